//! Staging areas for audio handed between pipeline stages.
//!
//! Synthesizer output lands in `data/unconverted` under a random 7-character
//! name; converter output lands in `data/converted` as `converted_<name>`.
//! Every file is owned by an [`AudioArtifact`] and removed when the artifact
//! drops, however the request ends.

use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use revoice_core::wav::write_wav;

use crate::error::Result;

/// Filename prefix of converter output.
pub const CONVERTED_PREFIX: &str = "converted_";

/// Random alphanumeric chars in an intermediate file name.
const NAME_LEN: usize = 7;

/// A WAV file on disk, deleted on drop.
#[derive(Debug)]
pub struct AudioArtifact {
    path: TempPath,
    sample_rate: u32,
}

impl AudioArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub async fn read(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path()).await?)
    }

    /// Keep the file at `dest` instead of deleting it.
    pub async fn persist(self, dest: &Path) -> Result<()> {
        if let Err(e) = self.path.persist(dest) {
            // rename fails across filesystems; the staged copy still drops
            debug!("rename to {} failed ({}), copying", dest.display(), e.error);
            tokio::fs::copy(&e.path, dest).await?;
        }
        Ok(())
    }
}

/// The two staging directories.
#[derive(Debug, Clone)]
pub struct Staging {
    unconverted: PathBuf,
    converted: PathBuf,
}

impl Staging {
    pub fn new(unconverted: impl Into<PathBuf>, converted: impl Into<PathBuf>) -> Self {
        Self {
            unconverted: unconverted.into(),
            converted: converted.into(),
        }
    }

    /// `<root>/data/unconverted` and `<root>/data/converted`.
    pub fn under(root: &Path) -> Self {
        let data = root.join("data");
        Self::new(data.join("unconverted"), data.join("converted"))
    }

    pub fn unconverted_dir(&self) -> &Path {
        &self.unconverted
    }

    pub fn converted_dir(&self) -> &Path {
        &self.converted
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.unconverted)?;
        std::fs::create_dir_all(&self.converted)?;
        Ok(())
    }

    /// Write synthesizer output under a fresh random name.
    pub async fn write_unconverted(&self, samples: &[i16], sample_rate: u32) -> Result<AudioArtifact> {
        let path = tempfile::Builder::new()
            .prefix("")
            .rand_bytes(NAME_LEN)
            .suffix(".wav")
            .tempfile_in(&self.unconverted)?
            .into_temp_path();

        tokio::fs::write(&path, write_wav(samples, sample_rate)).await?;
        debug!(
            "staged {} ({} samples @ {sample_rate} Hz)",
            path.display(),
            samples.len()
        );

        Ok(AudioArtifact { path, sample_rate })
    }

    /// Write converter output named after its source.
    pub async fn write_converted(
        &self,
        source: &AudioArtifact,
        samples: &[i16],
        sample_rate: u32,
    ) -> Result<AudioArtifact> {
        let path = self
            .converted
            .join(format!("{CONVERTED_PREFIX}{}", source.file_name()));

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        let path = TempPath::from_path(path);

        file.write_all(&write_wav(samples, sample_rate)).await?;
        file.flush().await?;
        debug!(
            "staged {} ({} samples @ {sample_rate} Hz)",
            path.display(),
            samples.len()
        );

        Ok(AudioArtifact { path, sample_rate })
    }
}

//! Speech synthesizer capability.
//!
//! One trait, four backends. `TTS_BACKEND` selects exactly one at startup:
//!
//! | backend    | model                            | speaker source          |
//! |------------|----------------------------------|-------------------------|
//! | `coqui`    | Coqui TTS checkpoint             | one reference wav       |
//! | `xtts`     | XTTS v2, cross-lingual cloning   | directory of wavs       |
//! | `f5`       | F5-TTS flow matching             | reference wav + text    |
//! | `styletts` | StyleTTS 2 diffusion             | bundled reference wav   |
//!
//! Settings are validated and artifact files checked by `from_env`, before
//! anything talks to the runtime. `load` then makes the model resident.

pub mod coqui;
pub mod f5;
pub mod styletts;
pub mod xtts;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use revoice_core::types::{Device, SynthesisRequest};

use crate::config::{ConfigError, EngineSettings, Env};
use crate::error::{Error, Result};
use crate::runtime::RuntimeClient;
use crate::staging::{AudioArtifact, Staging};

pub use coqui::{CoquiSettings, CoquiSynthesizer};
pub use f5::{F5Settings, F5Synthesizer};
pub use styletts::{StyleTtsSettings, StyleTtsSynthesizer};
pub use xtts::{XttsSettings, XttsSynthesizer};

/// Text spoken, and thrown away, by the warm-up pass.
pub const WARM_UP_TEXT: &str = "Generating warmup text so the first response is fast.";

/// Turns text into an intermediate WAV artifact.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &'static str;

    /// Rate used when the runtime does not report one.
    fn sample_rate(&self) -> u32;

    async fn synthesize(&self, text: &str, staging: &Staging) -> Result<AudioArtifact>;
}

/// Run one throwaway synthesis so lazy initialisation (kernel compilation,
/// cache allocation) happens before real traffic.
pub async fn warm_up(synth: &dyn SpeechSynthesizer, staging: &Staging) -> Result<()> {
    info!("warming up {} synthesizer", synth.name());
    let t0 = Instant::now();
    let artifact = synth.synthesize(WARM_UP_TEXT, staging).await?;
    drop(artifact);
    info!("{} warm-up done in {:.1?}", synth.name(), t0.elapsed());
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Coqui,
    Xtts,
    F5,
    StyleTts,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Coqui => "coqui",
            Backend::Xtts => "xtts",
            Backend::F5 => "f5",
            Backend::StyleTts => "styletts",
        }
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coqui" => Ok(Backend::Coqui),
            "xtts" => Ok(Backend::Xtts),
            "f5" => Ok(Backend::F5),
            "styletts" => Ok(Backend::StyleTts),
            other => Err(ConfigError::Invalid {
                key: "TTS_BACKEND",
                value: other.to_string(),
                reason: "expected coqui, xtts, f5 or styletts".into(),
            }),
        }
    }
}

/// Validated settings for the selected backend, ready to load.
#[derive(Debug, Clone)]
pub enum SynthesizerPlan {
    Coqui(CoquiSettings),
    Xtts(XttsSettings),
    F5(F5Settings),
    StyleTts(StyleTtsSettings),
}

impl SynthesizerPlan {
    pub fn from_env(env: &Env, engine: &EngineSettings) -> Result<Self> {
        let backend: Backend = env.optional("TTS_BACKEND").unwrap_or("coqui").parse()?;
        info!("speech synthesizer backend: {}", backend.as_str());

        Ok(match backend {
            Backend::Coqui => Self::Coqui(CoquiSettings::from_env(env, engine)?),
            Backend::Xtts => Self::Xtts(XttsSettings::from_env(env, engine)?),
            Backend::F5 => Self::F5(F5Settings::from_env(env, engine)?),
            Backend::StyleTts => Self::StyleTts(StyleTtsSettings::from_env(env, engine)?),
        })
    }

    pub fn backend(&self) -> Backend {
        match self {
            Self::Coqui(_) => Backend::Coqui,
            Self::Xtts(_) => Backend::Xtts,
            Self::F5(_) => Backend::F5,
            Self::StyleTts(_) => Backend::StyleTts,
        }
    }

    pub fn runtime_url(&self) -> &str {
        match self {
            Self::Coqui(s) => &s.runtime_url,
            Self::Xtts(s) => &s.runtime_url,
            Self::F5(s) => &s.runtime_url,
            Self::StyleTts(s) => &s.runtime_url,
        }
    }

    pub fn warm_up(&self) -> bool {
        match self {
            Self::Coqui(s) => s.warm_up,
            Self::Xtts(s) => s.warm_up,
            Self::F5(s) => s.warm_up,
            Self::StyleTts(s) => s.warm_up,
        }
    }

    pub async fn load(
        self,
        runtime: RuntimeClient,
        device: Device,
    ) -> Result<Box<dyn SpeechSynthesizer>> {
        Ok(match self {
            Self::Coqui(s) => Box::new(CoquiSynthesizer::load(s, runtime, device).await?),
            Self::Xtts(s) => Box::new(XttsSynthesizer::load(s, runtime, device).await?),
            Self::F5(s) => Box::new(F5Synthesizer::load(s, runtime, device).await?),
            Self::StyleTts(s) => Box::new(StyleTtsSynthesizer::load(s, runtime, device).await?),
        })
    }
}

/// Fail with [`Error::MissingArtifact`] unless `path` is a regular file.
pub(crate) fn require_file(path: PathBuf) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(Error::MissingArtifact(path))
    }
}

/// Fail with [`Error::MissingArtifact`] unless `path` is a directory.
pub(crate) fn require_dir(path: PathBuf) -> Result<PathBuf> {
    if path.is_dir() {
        Ok(path)
    } else {
        Err(Error::MissingArtifact(path))
    }
}

/// Synthesize each request in order and stage the concatenated audio.
pub(crate) async fn synthesize_chunks(
    runtime: &RuntimeClient,
    requests: Vec<SynthesisRequest>,
    native_rate: u32,
    staging: &Staging,
) -> Result<AudioArtifact> {
    if requests.is_empty() {
        return Err(Error::EmptyText);
    }

    let total = requests.len();
    let mut samples: Vec<i16> = Vec::new();
    let mut rate: Option<u32> = None;

    for (i, req) in requests.iter().enumerate() {
        debug!("chunk {}/{total}: {} chars", i + 1, req.text.chars().count());
        let pcm = runtime.synthesize(req).await?;
        let chunk_rate = pcm.sample_rate.unwrap_or(native_rate);
        match rate {
            None => rate = Some(chunk_rate),
            Some(r) if r != chunk_rate => {
                warn!("chunk {} came back at {chunk_rate} Hz, expected {r} Hz", i + 1)
            }
            Some(_) => {}
        }
        samples.extend(pcm.samples);
    }

    staging
        .write_unconverted(&samples, rate.unwrap_or(native_rate))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("XTTS".parse::<Backend>(), Ok(Backend::Xtts));
        assert_eq!(" styletts ".parse::<Backend>(), Ok(Backend::StyleTts));
        assert!("tacotron".parse::<Backend>().is_err());
    }

    #[test]
    fn plan_reports_every_missing_setting_for_its_backend() {
        let env = Env::from_pairs([("TTS_BACKEND", "f5"), ("F5_CKPT_FILE", "ckpt.pt")]);
        let engine = EngineSettings::from_env(&Env::from_pairs([("DEVICE", "cpu")])).unwrap();
        let err = SynthesizerPlan::from_env(&env, &engine).unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required environment variables: F5_VOCAB_FILE, TTS_REFERENCE_WAV, TTS_REFERENCE_TEXT, TTS_RUNTIME_URL"
        );
    }

    #[test]
    fn unknown_backend_is_a_config_error() {
        let env = Env::from_pairs([("TTS_BACKEND", "bark")]);
        let engine = EngineSettings::from_env(&Env::from_pairs([("DEVICE", "cpu")])).unwrap();
        assert!(matches!(
            SynthesizerPlan::from_env(&env, &engine),
            Err(Error::Config(ConfigError::Invalid { key: "TTS_BACKEND", .. }))
        ));
    }
}

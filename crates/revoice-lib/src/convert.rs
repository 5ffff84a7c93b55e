//! Voice converter capability.
//!
//! RVC re-voices synthesizer output with a target speaker's timbre. The
//! conversion model is loaded once; each call sends the staged WAV to the
//! runtime and stages the result as `converted_<source name>`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use revoice_core::types::{CONVERSION_SPEAKER_ID, ConversionRequest, Device, LoadRequest};
use revoice_core::wav::parse_wav_header;

use crate::config::{EngineSettings, Env};
use crate::error::{Error, Result};
use crate::runtime::{ModelHandle, RuntimeClient};
use crate::staging::{AudioArtifact, Staging};
use crate::synth::require_file;

/// Turns an intermediate WAV into the target voice.
#[async_trait]
pub trait VoiceConverter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn convert(&self, source: &AudioArtifact, staging: &Staging) -> Result<AudioArtifact>;
}

#[derive(Debug, Clone)]
pub struct RvcSettings {
    pub runtime_url: String,
    pub hubert: PathBuf,
    pub model: PathBuf,
    pub index_root: PathBuf,
    pub rmvpe_root: PathBuf,
    /// Configured index file. Existence is checked per call.
    pub index_file: Option<PathBuf>,
}

impl RvcSettings {
    pub fn from_env(env: &Env, engine: &EngineSettings) -> Result<Self> {
        let [hubert, model, index_root, rmvpe_root, runtime_url] = env.require(
            "rvc converter",
            [
                "HUBERT_PATH",
                "MODEL_PATH",
                "INDEX_ROOT",
                "RMVPE_ROOT",
                "RVC_RUNTIME_URL",
            ],
        )?;

        Ok(Self {
            runtime_url,
            hubert: require_file(engine.resolve(&hubert))?,
            model: require_file(engine.resolve(&model))?,
            index_root: engine.resolve(&index_root),
            rmvpe_root: engine.resolve(&rmvpe_root),
            index_file: env.optional("INDEX_FILE").map(|f| engine.resolve(f)),
        })
    }
}

pub struct RvcConverter {
    runtime: RuntimeClient,
    model: ModelHandle,
    index_file: Option<PathBuf>,
}

impl RvcConverter {
    pub async fn load(settings: RvcSettings, runtime: RuntimeClient, device: Device) -> Result<Self> {
        let model = runtime
            .load(&LoadRequest {
                engine: "rvc".into(),
                device,
                artifacts: BTreeMap::from([
                    ("model".to_string(), settings.model),
                    ("hubert".to_string(), settings.hubert),
                    ("index_root".to_string(), settings.index_root),
                    ("rmvpe_root".to_string(), settings.rmvpe_root),
                ]),
                options: serde_json::Map::new(),
            })
            .await?;

        if let Some(rate) = model.sample_rate {
            info!("rvc target rate: {rate} Hz");
        }

        Ok(Self {
            runtime,
            model,
            index_file: settings.index_file,
        })
    }

    fn usable_index(&self) -> Option<PathBuf> {
        let index = self.index_file.as_ref()?;
        if index.is_file() {
            Some(index.clone())
        } else {
            warn!(
                "index file {} does not exist, converting without it",
                index.display()
            );
            None
        }
    }
}

#[async_trait]
impl VoiceConverter for RvcConverter {
    fn name(&self) -> &'static str {
        "rvc"
    }

    async fn convert(&self, source: &AudioArtifact, staging: &Staging) -> Result<AudioArtifact> {
        let wav = source.read().await?;
        let header = parse_wav_header(&wav).map_err(|reason| Error::InvalidWav {
            path: source.path().to_path_buf(),
            reason,
        })?;
        debug!(
            "converting {} ({:.2}s @ {} Hz)",
            source.file_name(),
            header.duration_secs(wav.len()),
            header.sample_rate
        );

        let request = ConversionRequest {
            model_id: self.model.id.clone(),
            speaker_id: CONVERSION_SPEAKER_ID,
            index_file: self.usable_index(),
        };
        let pcm = self
            .runtime
            .convert(&request, source.file_name(), wav)
            .await?;

        let rate = pcm
            .sample_rate
            .or(self.model.sample_rate)
            .ok_or(Error::UnknownSampleRate("rvc"))?;

        staging.write_converted(source, &pcm.samples, rate).await
    }
}

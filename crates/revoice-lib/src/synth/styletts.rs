//! StyleTTS 2 diffusion synthesis. The speaker style comes from the
//! `reference.wav` shipped inside the model directory.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use revoice_core::types::{DecodingParams, Device, LoadRequest, SynthesisRequest};

use super::{SpeechSynthesizer, require_dir, require_file, synthesize_chunks};
use crate::config::{EngineSettings, Env};
use crate::error::Result;
use crate::runtime::{ModelHandle, RuntimeClient};
use crate::staging::{AudioArtifact, Staging};

const NATIVE_SAMPLE_RATE: u32 = 24_000;
const DIFFUSION_STEPS: u32 = 10;

#[derive(Debug, Clone)]
pub struct StyleTtsSettings {
    pub runtime_url: String,
    pub config: PathBuf,
    pub checkpoint: PathBuf,
    pub reference_wav: PathBuf,
    pub warm_up: bool,
}

impl StyleTtsSettings {
    pub fn from_env(env: &Env, engine: &EngineSettings) -> Result<Self> {
        let [model_dir, runtime_url] =
            env.require("styletts synthesizer", ["STYLETTS_MODEL_DIR", "TTS_RUNTIME_URL"])?;
        let model_dir = require_dir(engine.resolve(&model_dir))?;

        Ok(Self {
            runtime_url,
            config: require_file(model_dir.join("config.yml"))?,
            checkpoint: require_file(model_dir.join("model.pth"))?,
            reference_wav: require_file(model_dir.join("reference.wav"))?,
            warm_up: env.flag("TTS_WARM_UP").unwrap_or(false),
        })
    }
}

pub struct StyleTtsSynthesizer {
    runtime: RuntimeClient,
    model: ModelHandle,
    reference_wav: PathBuf,
}

impl StyleTtsSynthesizer {
    pub async fn load(
        settings: StyleTtsSettings,
        runtime: RuntimeClient,
        device: Device,
    ) -> Result<Self> {
        let model = runtime
            .load(&LoadRequest {
                engine: "styletts".into(),
                device,
                artifacts: BTreeMap::from([
                    ("config".to_string(), settings.config),
                    ("checkpoint".to_string(), settings.checkpoint),
                ]),
                options: serde_json::Map::new(),
            })
            .await?;

        Ok(Self {
            runtime,
            model,
            reference_wav: settings.reference_wav,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for StyleTtsSynthesizer {
    fn name(&self) -> &'static str {
        "styletts"
    }

    fn sample_rate(&self) -> u32 {
        self.model.sample_rate.unwrap_or(NATIVE_SAMPLE_RATE)
    }

    async fn synthesize(&self, text: &str, staging: &Staging) -> Result<AudioArtifact> {
        let request = SynthesisRequest {
            model_id: self.model.id.clone(),
            text: text.to_string(),
            language: None,
            reference_audio: vec![self.reference_wav.clone()],
            reference_text: None,
            params: DecodingParams {
                diffusion_steps: Some(DIFFUSION_STEPS),
                ..Default::default()
            },
        };
        synthesize_chunks(&self.runtime, vec![request], self.sample_rate(), staging).await
    }
}

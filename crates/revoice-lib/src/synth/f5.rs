//! F5-TTS flow-matching synthesis, conditioned on a reference recording and
//! its transcript.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use revoice_core::types::{DecodingParams, Device, LoadRequest, SynthesisRequest};

use super::{SpeechSynthesizer, require_file, synthesize_chunks};
use crate::config::{EngineSettings, Env};
use crate::error::Result;
use crate::runtime::{ModelHandle, RuntimeClient};
use crate::staging::{AudioArtifact, Staging};

const NATIVE_SAMPLE_RATE: u32 = 24_000;
const SPEED: f32 = 0.8;
const NFE_STEPS: u32 = 16;

#[derive(Debug, Clone)]
pub struct F5Settings {
    pub runtime_url: String,
    pub checkpoint: PathBuf,
    pub vocab: PathBuf,
    pub reference_wav: PathBuf,
    pub reference_text: String,
    pub warm_up: bool,
}

impl F5Settings {
    pub fn from_env(env: &Env, engine: &EngineSettings) -> Result<Self> {
        let [checkpoint, vocab, reference_wav, reference_text, runtime_url] = env.require(
            "f5 synthesizer",
            [
                "F5_CKPT_FILE",
                "F5_VOCAB_FILE",
                "TTS_REFERENCE_WAV",
                "TTS_REFERENCE_TEXT",
                "TTS_RUNTIME_URL",
            ],
        )?;

        Ok(Self {
            runtime_url,
            checkpoint: require_file(engine.resolve(&checkpoint))?,
            vocab: require_file(engine.resolve(&vocab))?,
            reference_wav: require_file(engine.resolve(&reference_wav))?,
            reference_text,
            warm_up: env.flag("TTS_WARM_UP").unwrap_or(true),
        })
    }
}

pub struct F5Synthesizer {
    runtime: RuntimeClient,
    model: ModelHandle,
    reference_wav: PathBuf,
    reference_text: String,
}

impl F5Synthesizer {
    pub async fn load(settings: F5Settings, runtime: RuntimeClient, device: Device) -> Result<Self> {
        let model = runtime
            .load(&LoadRequest {
                engine: "f5".into(),
                device,
                artifacts: BTreeMap::from([
                    ("checkpoint".to_string(), settings.checkpoint),
                    ("vocab".to_string(), settings.vocab),
                ]),
                options: serde_json::Map::new(),
            })
            .await?;

        Ok(Self {
            runtime,
            model,
            reference_wav: settings.reference_wav,
            reference_text: settings.reference_text,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for F5Synthesizer {
    fn name(&self) -> &'static str {
        "f5"
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
            reference_text: Some(self.reference_text.clone()),
            params: DecodingParams {
                speed: Some(SPEED),
                nfe_steps: Some(NFE_STEPS),
                ..Default::default()
            },
        };
        synthesize_chunks(&self.runtime, vec![request], self.sample_rate(), staging).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::{Fixture, mock_load, mock_synthesize};
    use wiremock::matchers::body_partial_json;

    fn env(fx: &Fixture) -> Env {
        Env::from_pairs([
            ("F5_CKPT_FILE", "ckpts/f5/model_1200000.safetensors".to_string()),
            ("F5_VOCAB_FILE", "ckpts/f5/vocab.txt".to_string()),
            ("TTS_REFERENCE_WAV", "voices/ref.wav".to_string()),
            ("TTS_REFERENCE_TEXT", "Some call me nature.".to_string()),
            ("TTS_RUNTIME_URL", fx.runtime_url()),
        ])
    }

    #[tokio::test]
    async fn missing_checkpoint_is_fatal() {
        let fx = Fixture::new().await;
        fx.touch("ckpts/f5/vocab.txt");
        fx.touch("voices/ref.wav");

        match F5Settings::from_env(&env(&fx), &fx.engine()).unwrap_err() {
            Error::MissingArtifact(path) => assert!(path.ends_with("model_1200000.safetensors")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn sends_reference_text_and_sampling_params() {
        let fx = Fixture::new().await;
        fx.touch("ckpts/f5/model_1200000.safetensors");
        fx.touch("ckpts/f5/vocab.txt");
        fx.touch("voices/ref.wav");
        mock_load(&fx.server, "f5", "f5-0", None).await;
        mock_synthesize(
            &fx.server,
            body_partial_json(serde_json::json!({
                "reference_text": "Some call me nature.",
                "params": {"speed": 0.8, "nfe_steps": 16},
            })),
            &[9, 9, 9],
            Some(24_000),
        )
        .await;

        let settings = F5Settings::from_env(&env(&fx), &fx.engine()).unwrap();
        assert!(settings.warm_up);
        let synth = F5Synthesizer::load(settings, fx.runtime(), Device::Cpu)
            .await
            .unwrap();

        let artifact = synth.synthesize("Hello.", &fx.staging).await.unwrap();
        assert_eq!(fx.samples(&artifact).await, vec![9, 9, 9]);
    }

    #[tokio::test]
    async fn warm_up_can_be_disabled() {
        let fx = Fixture::new().await;
        fx.touch("ckpts/f5/model_1200000.safetensors");
        fx.touch("ckpts/f5/vocab.txt");
        fx.touch("voices/ref.wav");
        let mut env = env(&fx);
        env.set("TTS_WARM_UP", "false");

        assert!(!F5Settings::from_env(&env, &fx.engine()).unwrap().warm_up);
    }
}

//! Coqui TTS multi-speaker model with one fixed reference recording.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use revoice_core::types::{DecodingParams, Device, LoadRequest, SynthesisRequest};

use super::{SpeechSynthesizer, require_dir, require_file, synthesize_chunks};
use crate::config::{EngineSettings, Env};
use crate::error::Result;
use crate::runtime::{ModelHandle, RuntimeClient};
use crate::staging::{AudioArtifact, Staging};

/// Used when the runtime does not report the checkpoint's rate.
const FALLBACK_SAMPLE_RATE: u32 = 22_050;

#[derive(Debug, Clone)]
pub struct CoquiSettings {
    pub runtime_url: String,
    pub model_name: String,
    pub model_dir: PathBuf,
    pub config_path: PathBuf,
    pub reference_wav: PathBuf,
    pub language: String,
    pub warm_up: bool,
}

impl CoquiSettings {
    pub fn from_env(env: &Env, engine: &EngineSettings) -> Result<Self> {
        let [model_name, model_dir, config_path, reference_wav, language, runtime_url] = env
            .require(
                "coqui synthesizer",
                [
                    "TTS_MODEL_NAME",
                    "TTS_MODEL_DIR",
                    "TTS_CONFIG_PATH",
                    "TTS_REFERENCE_WAV",
                    "TTS_LANGUAGE",
                    "TTS_RUNTIME_URL",
                ],
            )?;

        Ok(Self {
            runtime_url,
            model_name,
            model_dir: require_dir(engine.resolve(&model_dir))?,
            config_path: require_file(engine.resolve(&config_path))?,
            reference_wav: require_file(engine.resolve(&reference_wav))?,
            language,
            warm_up: env.flag("TTS_WARM_UP").unwrap_or(false),
        })
    }
}

pub struct CoquiSynthesizer {
    runtime: RuntimeClient,
    model: ModelHandle,
    reference_wav: PathBuf,
    language: String,
}

impl CoquiSynthesizer {
    pub async fn load(settings: CoquiSettings, runtime: RuntimeClient, device: Device) -> Result<Self> {
        let mut options = serde_json::Map::new();
        options.insert("model_name".into(), settings.model_name.clone().into());

        let model = runtime
            .load(&LoadRequest {
                engine: "coqui".into(),
                device,
                artifacts: BTreeMap::from([
                    ("model_dir".to_string(), settings.model_dir),
                    ("config".to_string(), settings.config_path),
                ]),
                options,
            })
            .await?;

        Ok(Self {
            runtime,
            model,
            reference_wav: settings.reference_wav,
            language: settings.language,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for CoquiSynthesizer {
    fn name(&self) -> &'static str {
        "coqui"
    }

    fn sample_rate(&self) -> u32 {
        self.model.sample_rate.unwrap_or(FALLBACK_SAMPLE_RATE)
    }

    async fn synthesize(&self, text: &str, staging: &Staging) -> Result<AudioArtifact> {
        let request = SynthesisRequest {
            model_id: self.model.id.clone(),
            text: text.to_string(),
            language: Some(self.language.clone()),
            reference_audio: vec![self.reference_wav.clone()],
            reference_text: None,
            params: DecodingParams::default(),
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
            ("TTS_MODEL_NAME", "tts_models/multilingual/multi-dataset/your_tts"),
            ("TTS_MODEL_DIR", "tts_models/your_tts"),
            ("TTS_CONFIG_PATH", "tts_models/your_tts/config.json"),
            ("TTS_REFERENCE_WAV", "voices/ref.wav"),
            ("TTS_LANGUAGE", "en"),
            ("TTS_RUNTIME_URL", fx.runtime_url().as_str()),
        ])
    }

    #[tokio::test]
    async fn missing_reference_wav_is_fatal() {
        let fx = Fixture::new().await;
        fx.touch("tts_models/your_tts/config.json");

        let err = CoquiSettings::from_env(&env(&fx), &fx.engine()).unwrap_err();
        match err {
            Error::MissingArtifact(path) => assert!(path.ends_with("voices/ref.wav")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn synthesizes_with_reference_and_language() {
        let fx = Fixture::new().await;
        fx.touch("tts_models/your_tts/config.json");
        fx.touch("voices/ref.wav");
        mock_load(&fx.server, "coqui", "coqui-0", None).await;
        mock_synthesize(
            &fx.server,
            body_partial_json(serde_json::json!({"model_id": "coqui-0", "language": "en"})),
            &[1, 2, 3, 4],
            None,
        )
        .await;

        let settings = CoquiSettings::from_env(&env(&fx), &fx.engine()).unwrap();
        assert!(!settings.warm_up);
        let synth = CoquiSynthesizer::load(settings, fx.runtime(), Device::Cpu)
            .await
            .unwrap();

        let artifact = synth.synthesize("Hello there.", &fx.staging).await.unwrap();
        assert_eq!(artifact.sample_rate(), FALLBACK_SAMPLE_RATE);
        assert_eq!(fx.samples(&artifact).await, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn unusable_rate_from_runtime_is_an_error() {
        let fx = Fixture::new().await;
        fx.touch("tts_models/your_tts/config.json");
        fx.touch("voices/ref.wav");
        mock_load(&fx.server, "coqui", "coqui-0", None).await;
        mock_synthesize(
            &fx.server,
            body_partial_json(serde_json::json!({"model_id": "coqui-0"})),
            &[1, 2],
            Some(3_000_000_000),
        )
        .await;

        let settings = CoquiSettings::from_env(&env(&fx), &fx.engine()).unwrap();
        let synth = CoquiSynthesizer::load(settings, fx.runtime(), Device::Cpu)
            .await
            .unwrap();

        assert!(matches!(
            synth.synthesize("hi", &fx.staging).await,
            Err(Error::InvalidSampleRate(3_000_000_000))
        ));
        assert!(crate::testing::is_empty(fx.staging.unconverted_dir()));
    }
}

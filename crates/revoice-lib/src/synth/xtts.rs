//! XTTS v2 cross-lingual voice cloning.
//!
//! The speaker is conditioned on every `*.wav` under
//! `<TTS_MODEL_DIR>/reference_files`. Decoding parameters come from the
//! checkpoint's own `config.json`. Long text is split into sentence chunks
//! that fit the model's context and the audio concatenated.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use revoice_core::text_prep::{DEFAULT_MAX_CHUNK_LEN, split_for_synthesis};
use revoice_core::types::{DecodingParams, Device, LoadRequest, SynthesisRequest};

use super::{SpeechSynthesizer, require_dir, require_file, synthesize_chunks};
use crate::config::{ConfigError, EngineSettings, Env};
use crate::error::{Error, Result};
use crate::runtime::{ModelHandle, RuntimeClient};
use crate::staging::{AudioArtifact, Staging};

const NATIVE_SAMPLE_RATE: u32 = 24_000;

/// Sampling section of an XTTS `config.json`. Missing keys take the
/// upstream defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
struct XttsModelConfig {
    temperature: f32,
    length_penalty: f32,
    repetition_penalty: f32,
    top_k: u32,
    top_p: f32,
    gpt_cond_len: u32,
    max_ref_len: u32,
    sound_norm_refs: bool,
}

impl Default for XttsModelConfig {
    fn default() -> Self {
        Self {
            temperature: 0.85,
            length_penalty: 1.0,
            repetition_penalty: 2.0,
            top_k: 50,
            top_p: 0.85,
            gpt_cond_len: 12,
            max_ref_len: 10,
            sound_norm_refs: false,
        }
    }
}

impl From<XttsModelConfig> for DecodingParams {
    fn from(c: XttsModelConfig) -> Self {
        DecodingParams {
            temperature: Some(c.temperature),
            top_k: Some(c.top_k),
            top_p: Some(c.top_p),
            length_penalty: Some(c.length_penalty),
            repetition_penalty: Some(c.repetition_penalty),
            gpt_cond_len: Some(c.gpt_cond_len),
            max_ref_len: Some(c.max_ref_len),
            sound_norm_refs: Some(c.sound_norm_refs),
            ..Default::default()
        }
    }
}

fn read_decoding_params(config: &Path) -> Result<DecodingParams> {
    let raw = std::fs::read(config)?;
    let parsed: XttsModelConfig =
        serde_json::from_slice(&raw).map_err(|source| Error::ModelConfig {
            path: config.to_path_buf(),
            source,
        })?;
    Ok(parsed.into())
}

#[derive(Debug, Clone)]
pub struct XttsSettings {
    pub runtime_url: String,
    pub config: PathBuf,
    pub checkpoint: PathBuf,
    pub vocab: PathBuf,
    pub speakers: Option<PathBuf>,
    pub reference_files: Vec<PathBuf>,
    pub language: String,
    pub use_deepspeed: bool,
    pub warm_up: bool,
    pub max_chunk_len: usize,
    pub params: DecodingParams,
}

impl XttsSettings {
    pub fn from_env(env: &Env, engine: &EngineSettings) -> Result<Self> {
        let [model_dir, language, runtime_url] = env.require(
            "xtts synthesizer",
            ["TTS_MODEL_DIR", "TTS_LANGUAGE", "TTS_RUNTIME_URL"],
        )?;
        let model_dir = require_dir(engine.resolve(&model_dir))?;

        let config = require_file(model_dir.join("config.json"))?;
        let checkpoint = require_file(model_dir.join("model.pth"))?;
        let vocab = require_file(model_dir.join("vocab.json"))?;

        let speakers = model_dir.join("speakers_xtts.pth");
        let speakers = if speakers.is_file() {
            Some(speakers)
        } else {
            warn!(
                "speakers file {} does not exist, proceeding without it",
                speakers.display()
            );
            None
        };

        let max_chunk_len = env
            .parse_optional("TTS_MAX_CHUNK_LEN")?
            .unwrap_or(DEFAULT_MAX_CHUNK_LEN);
        if max_chunk_len == 0 {
            return Err(ConfigError::Invalid {
                key: "TTS_MAX_CHUNK_LEN",
                value: "0".into(),
                reason: "must be at least 1".into(),
            }
            .into());
        }

        let reference_files = reference_wavs(&model_dir.join("reference_files"))?;
        info!("xtts: conditioning on {} reference file(s)", reference_files.len());

        Ok(Self {
            runtime_url,
            params: read_decoding_params(&config)?,
            config,
            checkpoint,
            vocab,
            speakers,
            reference_files,
            language,
            use_deepspeed: env.flag("USE_DEEPSPEED").unwrap_or(false),
            warm_up: env.flag("TTS_WARM_UP").unwrap_or(true),
            max_chunk_len,
        })
    }
}

/// Every `*.wav` in `dir`, sorted for a stable speaker embedding.
fn reference_wavs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|_| Error::NoReferenceAudio(dir.to_path_buf()))?;

    let mut wavs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
        })
        .collect();
    wavs.sort();

    if wavs.is_empty() {
        return Err(Error::NoReferenceAudio(dir.to_path_buf()));
    }
    Ok(wavs)
}

pub struct XttsSynthesizer {
    runtime: RuntimeClient,
    model: ModelHandle,
    reference_files: Vec<PathBuf>,
    language: String,
    max_chunk_len: usize,
    params: DecodingParams,
}

impl XttsSynthesizer {
    pub async fn load(settings: XttsSettings, runtime: RuntimeClient, device: Device) -> Result<Self> {
        let mut artifacts = BTreeMap::from([
            ("config".to_string(), settings.config),
            ("checkpoint".to_string(), settings.checkpoint),
            ("vocab".to_string(), settings.vocab),
        ]);
        if let Some(speakers) = settings.speakers {
            artifacts.insert("speakers".to_string(), speakers);
        }

        let mut options = serde_json::Map::new();
        options.insert("use_deepspeed".into(), settings.use_deepspeed.into());

        let model = runtime
            .load(&LoadRequest {
                engine: "xtts".into(),
                device,
                artifacts,
                options,
            })
            .await?;

        Ok(Self {
            runtime,
            model,
            reference_files: settings.reference_files,
            language: settings.language,
            max_chunk_len: settings.max_chunk_len,
            params: settings.params,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for XttsSynthesizer {
    fn name(&self) -> &'static str {
        "xtts"
    }

    fn sample_rate(&self) -> u32 {
        self.model.sample_rate.unwrap_or(NATIVE_SAMPLE_RATE)
    }

    async fn synthesize(&self, text: &str, staging: &Staging) -> Result<AudioArtifact> {
        let requests = split_for_synthesis(text, self.max_chunk_len)
            .into_iter()
            .map(|chunk| SynthesisRequest {
                model_id: self.model.id.clone(),
                text: chunk,
                language: Some(self.language.clone()),
                reference_audio: self.reference_files.clone(),
                reference_text: None,
                params: self.params.clone(),
            })
            .collect();

        synthesize_chunks(&self.runtime, requests, self.sample_rate(), staging).await
    }
}

//! Shared types for the revoice speech pipeline.
//!
//! Two groups live here: the public HTTP API payloads served by revoice-lib,
//! and the wire types spoken to the inference runtime that hosts the models.
//! Keeping them in revoice-core lets clients depend on the payloads without
//! pulling in tokio, axum or reqwest.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ─── HTTP API ──────────────────────────────────────────────────────────────

/// Body returned with a 400 from `POST /generate`.
pub const MESSAGE_MISSING: &str = "Message missing from body.";

/// Body returned with a 503 from `POST /generate`. Failure detail stays in the
/// server log.
pub const GENERIC_FAILURE: &str = "Something went wrong.";

/// Attachment name of the WAV returned by `POST /generate`.
pub const OUTPUT_FILENAME: &str = "out_from_text.wav";

/// `POST /generate` request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub message: Option<String>,
}

impl GenerateRequest {
    /// The text to speak. Absent, null and blank messages all count as missing.
    pub fn text(&self) -> Option<&str> {
        self.message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}

/// `GET /health` body when the pipeline is loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn ready() -> Self {
        Self {
            status: "ready".into(),
        }
    }
}

/// Error payload for 4xx/5xx JSON responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}

// ─── Inference runtime ─────────────────────────────────────────────────────

/// Compute device a model is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cuda => f.write_str("cuda"),
            Device::Cpu => f.write_str("cpu"),
        }
    }
}

/// Load a model into the runtime: `POST /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRequest {
    /// Engine family understood by the runtime (`coqui`, `xtts`, `f5`, `styletts`, `rvc`).
    pub engine: String,
    pub device: Device,
    /// Named model files, already verified to exist.
    pub artifacts: BTreeMap<String, PathBuf>,
    /// Engine-specific switches (e.g. `use_deepspeed`).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// Handle returned once a model is resident in the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadResponse {
    pub model_id: String,
    /// Native output rate reported by the model, if the runtime knows it.
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

/// Sampling and decoding knobs forwarded to the model. Unset fields keep the
/// engine's own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfe_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diffusion_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpt_cond_len: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ref_len: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound_norm_refs: Option<bool>,
}

/// Synthesize one chunk of text: `POST /v1/synthesize`.
///
/// The response body is raw PCM, signed 16-bit little-endian mono, with the
/// rate in an optional `x-sample-rate` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub model_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// One fixed recording, or several recordings averaged into one speaker.
    #[serde(default)]
    pub reference_audio: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_text: Option<String>,
    #[serde(default)]
    pub params: DecodingParams,
}

/// Speaker slot targeted by every conversion.
pub const CONVERSION_SPEAKER_ID: u32 = 1;

/// JSON part of the multipart `POST /v1/convert` request. The source WAV
/// travels in the `audio` part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub model_id: String,
    pub speaker_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_file: Option<PathBuf>,
}

//! Engine error type.
//!
//! Capability layers propagate these unchanged; only the HTTP layer turns
//! them into status codes.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("required file does not exist: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("no .wav files found in reference directory: {}", .0.display())]
    NoReferenceAudio(PathBuf),

    #[error("failed to read model config {}: {source}", .path.display())]
    ModelConfig {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("inference runtime request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to encode runtime request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("inference runtime returned {status}: {body}")]
    Runtime { status: u16, body: String },

    #[error("inference runtime at {url} did not become ready within {secs}s")]
    RuntimeNotReady { url: String, secs: u64 },

    #[error("inference runtime returned no audio")]
    EmptyAudio,

    #[error("inference runtime reported an unusable sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    #[error("no sample rate known for {0} output")]
    UnknownSampleRate(&'static str),

    #[error("invalid wav {}: {reason}", .path.display())]
    InvalidWav {
        path: PathBuf,
        reason: &'static str,
    },

    #[error("nothing to synthesize")]
    EmptyText,

    #[error("pipeline is shutting down")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

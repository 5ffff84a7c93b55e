//! revoice-lib: speech pipeline engine.
//!
//! Synthesizer backends, RVC voice conversion, artifact staging, and the HTTP
//! API. Models run in an external inference runtime reached over HTTP.
//! Depends on revoice-core for pure types, WAV handling and text chunking.

pub mod config;
pub mod convert;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod server;
pub mod staging;
pub mod synth;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelinePlan};

// Re-export revoice-core for convenience
pub use revoice_core;

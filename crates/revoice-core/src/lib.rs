//! revoice-core: pure types, WAV encoding and text chunking.
//!
//! No async runtime, no I/O, no platform dependencies.

pub mod text_prep;
pub mod types;
pub mod wav;

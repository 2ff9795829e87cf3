//! sotto - streaming speech-to-text over a bounded worker pool
//!
//! Audio flows source → chunk assembler → worker pool → transcript events.
//! Inference runs on dedicated worker threads behind the `SpeechModel`
//! trait, so the whole pipeline is testable without a real model.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod streaming;
pub mod worker;

// Core traits (source → assemble → infer)
pub use audio::recorder::AudioSource;
pub use engine::model::SpeechModel;

// Pipeline
pub use streaming::assembler::{AssemblerConfig, BackpressurePolicy, ChunkAssembler};
pub use streaming::chunk::{AudioChunk, TranscriptionResult, TranscriptionSegment};
pub use streaming::session::{SessionEvent, StreamingSession};
pub use worker::pool::WorkerPool;

// Error handling
pub use error::{Result, SottoError};

// Config
pub use config::{Config, ModelConfig, PoolConfig};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{version}+{hash}"),
        _ => version.to_string(),
    }
}

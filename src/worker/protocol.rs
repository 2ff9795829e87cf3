//! Message contract between the orchestrator and an inference worker.
//!
//! A worker processes at most one request at a time; there is no request-id
//! field, responses correlate purely by single-flight ordering per handle.
//! The JSON form mirrors the wire schema: a SCREAMING_SNAKE_CASE `type` tag
//! and an optional `payload`.

use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::SottoError;
use crate::streaming::chunk::{AudioChunk, TranscriptionResult};

/// Requests sent by the orchestrator to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    /// Fetch and instantiate the model.
    LoadModel(ModelConfig),
    /// Transcribe one audio chunk.
    ProcessAudio(AudioChunk),
    /// Destroy the native instance and terminate the worker.
    Abort,
    /// Destroy the native instance but stay alive for a fresh LoadModel.
    Reset,
}

/// Responses sent by a worker to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    /// The model is loaded and the worker is ready.
    ModelLoaded,
    /// Inference for the current chunk has begun.
    ProcessingStarted,
    /// Best-effort progress report, percent 0-100.
    ProcessingProgress(f32),
    /// Decoded transcript for the current chunk.
    TranscriptionResult(TranscriptionResult),
    /// A fault, converted at the message boundary; the worker never crashes.
    Error(String),
}

impl Request {
    /// Serialize to the wire JSON form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from the wire JSON form.
    ///
    /// An unrecognized `type` tag is an `UnknownMessage` error.
    pub fn from_json(s: &str) -> Result<Self, SottoError> {
        serde_json::from_str(s).map_err(|e| SottoError::UnknownMessage {
            message: e.to_string(),
        })
    }
}

impl Response {
    /// Serialize to the wire JSON form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from the wire JSON form.
    pub fn from_json(s: &str) -> Result<Self, SottoError> {
        serde_json::from_str(s).map_err(|e| SottoError::UnknownMessage {
            message: e.to_string(),
        })
    }
}

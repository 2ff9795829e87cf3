//! Error types for sotto.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SottoError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // Model loading errors
    #[error("Model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Model initialization failed: {message}")]
    Initialization { message: String },

    // Inference errors
    #[error("Inference failed: {message}")]
    Processing { message: String },

    // Timeout errors (load or process exceeded its budget)
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    // Lifecycle errors
    #[error("No ready model instance (pool not initialized or cleaned up)")]
    NotInitialized,

    #[error("Worker {id} is busy with an in-flight request")]
    WorkerBusy { id: u64 },

    // Protocol errors
    #[error("Unknown message: {message}")]
    UnknownMessage { message: String },

    #[error("Worker channel closed: {message}")]
    WorkerGone { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SottoError>;

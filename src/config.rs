use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::defaults;
use crate::error::{Result, SottoError};
use crate::streaming::assembler::AssemblerConfig;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub pool: PoolConfig,
    pub assembler: AssemblerConfig,
}

/// Model configuration, shared by every worker in a pool.
///
/// Immutable after pool construction; the identical config is used to
/// (re)create every worker in the pool's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the model file.
    pub model_path: PathBuf,
    /// Number of inference threads per worker instance.
    pub num_threads: usize,
    /// ISO language code, or "auto" for detection.
    pub language: String,
    /// Translate output to English.
    pub translate: bool,
    /// Print progress information.
    pub print_progress: bool,
    /// Print special tokens.
    pub print_special: bool,
    /// Print timestamps.
    pub print_timestamps: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            num_threads: defaults::default_num_threads(),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            translate: false,
            print_progress: false,
            print_special: false,
            print_timestamps: false,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on live worker instances.
    pub max_workers: usize,
    /// Budget for loading a model into a new worker, in milliseconds.
    pub load_timeout_ms: u64,
    /// Budget for one inference request, in milliseconds.
    pub process_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: defaults::default_max_workers(),
            load_timeout_ms: defaults::LOAD_TIMEOUT.as_millis() as u64,
            process_timeout_ms: defaults::PROCESS_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SOTTO_MODEL_PATH → model.model_path
    /// - SOTTO_LANGUAGE → model.language
    /// - SOTTO_MAX_WORKERS → pool.max_workers
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("SOTTO_MODEL_PATH")
            && !path.is_empty()
        {
            self.model.model_path = PathBuf::from(path);
        }
        if let Ok(language) = std::env::var("SOTTO_LANGUAGE")
            && !language.is_empty()
        {
            self.model.language = language;
        }
        if let Ok(workers) = std::env::var("SOTTO_MAX_WORKERS")
            && let Ok(n) = workers.parse::<usize>()
        {
            self.pool.max_workers = n;
        }
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.model.num_threads < 1 {
            return Err(SottoError::ConfigInvalidValue {
                key: "model.num_threads".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.pool.max_workers < 1 {
            return Err(SottoError::ConfigInvalidValue {
                key: "pool.max_workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.assembler.capacity == 0 {
            return Err(SottoError::ConfigInvalidValue {
                key: "assembler.capacity".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

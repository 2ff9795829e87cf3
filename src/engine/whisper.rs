//! Whisper-based speech model.
//!
//! Provides a Whisper implementation of the `SpeechModel` trait using
//! whisper-rs. Unlike the flat-transcript binary interface, this backend
//! exposes per-segment timestamps and confidence.
//!
//! # Feature Gate
//!
//! This module requires the `whisper` feature to be enabled and cmake to be
//! installed:
//!
//! ```bash
//! cargo build --features whisper
//! ```

use crate::config::ModelConfig;
#[cfg(feature = "whisper")]
use crate::defaults;
use crate::engine::model::SpeechModel;
use crate::error::{Result, SottoError};
use crate::streaming::chunk::TranscriptionResult;

#[cfg(feature = "whisper")]
use crate::streaming::chunk::TranscriptionSegment;
#[cfg(feature = "whisper")]
use std::sync::Once;
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Whisper-backed speech model.
///
/// Each instance owns its own `WhisperContext`; the pool creates one per
/// worker, so no cross-worker locking is needed.
#[cfg(feature = "whisper")]
pub struct WhisperModel {
    context: WhisperContext,
    config: ModelConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperModel")
            .field("config", &self.config)
            .field("model_name", &self.model_name)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

/// Whisper-backed speech model placeholder (without the whisper feature).
///
/// A stub that returns errors when used. Enable the `whisper` feature for
/// real transcription.
#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperModel {
    config: ModelConfig,
    model_name: String,
}

impl WhisperModel {
    /// Loads a Whisper model from `config.model_path`.
    ///
    /// # Errors
    /// Returns `SottoError::ModelNotFound` if the model file doesn't exist,
    /// `SottoError::Initialization` if loading fails.
    #[cfg(feature = "whisper")]
    pub fn load(config: &ModelConfig) -> Result<Self> {
        // Suppress whisper.cpp output (only once per process)
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(SottoError::ModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = model_name_of(config);

        let context_params = WhisperContextParameters::default();
        let context = WhisperContext::new_with_params(
            config
                .model_path
                .to_str()
                .ok_or_else(|| SottoError::Initialization {
                    message: "Invalid UTF-8 in model path".to_string(),
                })?,
            context_params,
        )
        .map_err(|e| SottoError::Initialization {
            message: format!("Failed to load Whisper model: {e}"),
        })?;

        Ok(Self {
            context,
            config: config.clone(),
            model_name,
        })
    }

    /// Loads a Whisper model (stub implementation).
    #[cfg(not(feature = "whisper"))]
    pub fn load(config: &ModelConfig) -> Result<Self> {
        if !config.model_path.exists() {
            return Err(SottoError::ModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }
        Ok(Self {
            model_name: model_name_of(config),
            config: config.clone(),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

fn model_name_of(config: &ModelConfig) -> String {
    config
        .model_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(feature = "whisper")]
impl SpeechModel for WhisperModel {
    fn transcribe(&mut self, samples: &[f32]) -> Result<TranscriptionResult> {
        let mut state = self
            .context
            .create_state()
            .map_err(|e| SottoError::Processing {
                message: format!("Failed to create Whisper state: {e}"),
            })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        if self.config.language == defaults::AUTO_LANGUAGE {
            params.set_language(None);
        } else {
            params.set_language(Some(&self.config.language));
        }
        params.set_n_threads(self.config.num_threads as i32);
        params.set_translate(self.config.translate);
        params.set_print_special(self.config.print_special);
        params.set_print_progress(self.config.print_progress);
        params.set_print_realtime(false);
        params.set_print_timestamps(self.config.print_timestamps);

        state
            .full(params, samples)
            .map_err(|e| SottoError::Processing {
                message: format!("Whisper inference failed: {e}"),
            })?;

        let lang_id = state.full_lang_id_from_state();
        let language = whisper_rs::get_lang_str(lang_id).unwrap_or("").to_string();

        let duration_ms = (samples.len() as u64 * 1000) / defaults::SAMPLE_RATE as u64;

        // Whisper timestamps are centiseconds; clamp into [0, duration].
        let mut segments = Vec::new();
        for segment in state.as_iter() {
            let text = segment.to_string().trim().to_string();
            if text.is_empty() {
                continue;
            }
            let start_ms = (segment.start_timestamp().max(0) as u64 * 10).min(duration_ms);
            let end_ms = (segment.end_timestamp().max(0) as u64 * 10).clamp(start_ms, duration_ms);
            segments.push(TranscriptionSegment {
                start_ms,
                end_ms,
                text,
                confidence: (1.0 - segment.no_speech_probability()).clamp(0.0, 1.0),
                speaker: None,
            });
        }

        Ok(TranscriptionResult {
            segments,
            duration_ms,
            language,
            model: self.model_name.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(not(feature = "whisper"))]
impl SpeechModel for WhisperModel {
    fn transcribe(&mut self, _samples: &[f32]) -> Result<TranscriptionResult> {
        Err(SottoError::Processing {
            message: concat!(
                "Whisper feature not enabled. This binary was built without speech recognition.\n",
                "To fix: cargo build --release (whisper is enabled by default)\n",
                "If build fails with cmake errors, install: sudo apt install cmake"
            )
            .to_string(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        false
    }
}

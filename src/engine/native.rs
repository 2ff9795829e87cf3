//! Speech model backed by the native binary interface.
//!
//! Implements the full marshal cycle for one chunk: allocate a native
//! buffer sized to the samples, copy them in, invoke the inference entry
//! point, read the null-terminated transcript back, and release both the
//! input and transcript buffers on every exit path, including a non-zero
//! native status.

use std::path::Path;

use crate::config::ModelConfig;
use crate::defaults;
use crate::engine::abi::{NULL_PTR, NativeAbi, NativeImports, NativePtr};
use crate::engine::model::SpeechModel;
use crate::error::{Result, SottoError};
use crate::streaming::chunk::{TranscriptionResult, TranscriptionSegment};

/// `SpeechModel` over a `NativeAbi` instance.
#[derive(Debug)]
pub struct NativeSpeechModel<A: NativeAbi> {
    abi: A,
    model_name: String,
    language: String,
}

impl<A: NativeAbi> NativeSpeechModel<A> {
    /// Fetches the model image from `config.model_path`, instantiates the
    /// native module with it, and blocks until the runtime reports ready.
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let image = fetch_model_image(&config.model_path)?;
        let abi = A::instantiate(image, NativeImports::default())?;
        Self::from_abi(abi, model_name_from_path(&config.model_path), &config.language)
    }

    /// Wraps an already-instantiated module, running its init entry point.
    ///
    /// Used by tests to inject a configured `MockAbi`; the load path above
    /// goes through the same readiness check.
    pub fn from_abi(mut abi: A, model_name: String, language: &str) -> Result<Self> {
        let status = abi.init();
        if status != 0 {
            abi.cleanup();
            return Err(SottoError::Initialization {
                message: format!("native init returned status {status}"),
            });
        }
        tracing::debug!(model = %model_name, "native model ready");
        Ok(Self {
            abi,
            model_name,
            language: language.to_string(),
        })
    }

    /// Runs the process/read-back half of the cycle against an input buffer
    /// the caller owns. The caller frees the input on every return path.
    fn process_at(abi: &mut A, input: NativePtr, samples: &[f32]) -> Result<String> {
        abi.write_samples(input, samples)?;

        let status = abi.process(input, samples.len(), defaults::SAMPLE_RATE);
        if status != 0 {
            return Err(SottoError::Processing {
                message: format!("native process returned status {status}"),
            });
        }

        let text_ptr = abi.get_text();
        if text_ptr == NULL_PTR {
            return Err(SottoError::Processing {
                message: "native module returned a null transcript pointer".to_string(),
            });
        }
        let text = abi.read_cstr(text_ptr);
        abi.free_text(text_ptr);
        text
    }
}

impl<A: NativeAbi> SpeechModel for NativeSpeechModel<A> {
    fn transcribe(&mut self, samples: &[f32]) -> Result<TranscriptionResult> {
        let input = self.abi.malloc(samples.len() * size_of::<f32>())?;
        let outcome = Self::process_at(&mut self.abi, input, samples);
        // The input buffer is released whether inference succeeded or not.
        self.abi.free(input);
        let text = outcome?;

        let duration_ms = (samples.len() as u64 * 1000) / defaults::SAMPLE_RATE as u64;
        let text = text.trim().to_string();
        let segments = if text.is_empty() {
            Vec::new()
        } else {
            // The binary interface yields a flat transcript; it becomes one
            // segment spanning the chunk. Finer timing needs a backend that
            // exposes per-segment timestamps.
            vec![TranscriptionSegment {
                start_ms: 0,
                end_ms: duration_ms,
                text,
                confidence: 1.0,
                speaker: None,
            }]
        };

        Ok(TranscriptionResult {
            segments,
            duration_ms,
            language: self.language.clone(),
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

impl<A: NativeAbi> Drop for NativeSpeechModel<A> {
    fn drop(&mut self) {
        // The native instance never outlives its model handle.
        self.abi.cleanup();
    }
}

/// Reads the model bytes from a caller-supplied path.
fn fetch_model_image(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(SottoError::ModelNotFound {
            path: path.to_string_lossy().to_string(),
        });
    }
    std::fs::read(path).map_err(|e| SottoError::Initialization {
        message: format!("failed to fetch model from {}: {e}", path.display()),
    })
}

fn model_name_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::abi::MockAbi;
    use std::path::PathBuf;

    fn model_with(abi: MockAbi) -> Result<NativeSpeechModel<MockAbi>> {
        NativeSpeechModel::from_abi(abi, "mock-native".to_string(), "en")
    }

    #[test]
    fn test_transcribe_marshals_and_reads_back() {
        let abi = MockAbi::new().with_transcript("the quick brown fox");
        let probe = abi.clone();
        let mut model = model_with(abi).unwrap();

        let result = model.transcribe(&vec![0.1; 16000]).unwrap();
        assert_eq!(result.text(), "the quick brown fox");
        assert_eq!(result.duration_ms, 1000);
        assert_eq!(result.model, "mock-native");
        assert_eq!(probe.processed_samples(), 16000);
    }

    #[test]
    fn test_transcribe_frees_all_buffers_on_success() {
        let abi = MockAbi::new();
        let probe = abi.clone();
        let mut model = model_with(abi).unwrap();

        model.transcribe(&vec![0.1; 1600]).unwrap();
        assert_eq!(probe.live_allocations(), 0);
        assert_eq!(probe.total_allocations(), probe.total_frees());
    }

    #[test]
    fn test_transcribe_frees_input_on_native_fault() {
        let abi = MockAbi::new().with_process_status(3);
        let probe = abi.clone();
        let mut model = model_with(abi).unwrap();

        let result = model.transcribe(&vec![0.1; 1600]);
        match result {
            Err(SottoError::Processing { message }) => {
                assert!(message.contains("status 3"), "got: {message}");
            }
            other => panic!("Expected Processing error, got {other:?}"),
        }
        // No leak on the error path.
        assert_eq!(probe.live_allocations(), 0);
    }

    #[test]
    fn test_transcribe_null_transcript_is_error_without_leak() {
        let abi = MockAbi::new().with_null_text();
        let probe = abi.clone();
        let mut model = model_with(abi).unwrap();

        assert!(model.transcribe(&vec![0.1; 1600]).is_err());
        assert_eq!(probe.live_allocations(), 0);
    }

    #[test]
    fn test_init_fault_cleans_up_instance() {
        let abi = MockAbi::new().with_init_status(7);
        let probe = abi.clone();
        let result = model_with(abi);
        match result {
            Err(SottoError::Initialization { message }) => {
                assert!(message.contains("status 7"));
            }
            other => panic!("Expected Initialization error, got {other:?}"),
        }
        assert!(probe.cleaned_up());
    }

    #[test]
    fn test_drop_destroys_native_instance() {
        let abi = MockAbi::new();
        let probe = abi.clone();
        let model = model_with(abi).unwrap();
        drop(model);
        assert!(probe.cleaned_up());
    }

    #[test]
    fn test_segment_bounds_hold() {
        let abi = MockAbi::new().with_transcript("bounded");
        let mut model = model_with(abi).unwrap();
        let result = model.transcribe(&vec![0.1; 48000]).unwrap();
        assert!(result.segments_in_bounds());
        assert_eq!(result.segments[0].end_ms, result.duration_ms);
    }

    #[test]
    fn test_empty_transcript_yields_no_segments() {
        let abi = MockAbi::new().with_transcript("   ");
        let mut model = model_with(abi).unwrap();
        let result = model.transcribe(&vec![0.1; 1600]).unwrap();
        assert!(result.segments.is_empty());
    }

    #[test]
    fn test_load_missing_model_path() {
        let config = ModelConfig {
            model_path: PathBuf::from("/nonexistent/model.bin"),
            ..ModelConfig::default()
        };
        let result = NativeSpeechModel::<MockAbi>::load(&config);
        match result {
            Err(SottoError::ModelNotFound { path }) => {
                assert_eq!(path, "/nonexistent/model.bin");
            }
            other => panic!("Expected ModelNotFound error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ggml-tiny.bin");
        std::fs::write(&path, b"fake model image").unwrap();

        let config = ModelConfig {
            model_path: path,
            ..ModelConfig::default()
        };
        let model = NativeSpeechModel::<MockAbi>::load(&config).unwrap();
        assert_eq!(model.model_name(), "ggml-tiny");
        assert!(model.is_ready());
    }
}

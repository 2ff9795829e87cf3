//! The speech model seam between workers and inference backends.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ModelConfig;
use crate::defaults;
use crate::error::{Result, SottoError};
use crate::streaming::chunk::{TranscriptionResult, TranscriptionSegment};

/// One loaded speech-to-text model instance.
///
/// A model is owned exclusively by one worker, which is why `transcribe`
/// takes `&mut self`: the native memory behind it has a single writer.
/// Dropping the model releases its native instance.
pub trait SpeechModel: Send {
    /// Transcribe one chunk of f32 samples at 16kHz mono.
    fn transcribe(&mut self, samples: &[f32]) -> Result<TranscriptionResult>;

    /// Name of the loaded model.
    fn model_name(&self) -> &str;

    /// Whether this instance can accept requests.
    fn is_ready(&self) -> bool;
}

/// Creates one model instance per worker from the pool-wide config.
///
/// Every worker in a pool's lifetime is built from the identical config.
pub type ModelFactory = Arc<dyn Fn(&ModelConfig) -> Result<Box<dyn SpeechModel>> + Send + Sync>;

/// Mock speech model for testing.
pub struct MockSpeechModel {
    model_name: String,
    text: String,
    segments: Option<Vec<TranscriptionSegment>>,
    latency: Duration,
    should_fail: bool,
}

impl MockSpeechModel {
    /// Create a new mock model with default settings.
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            text: "mock transcription".to_string(),
            segments: None,
            latency: Duration::ZERO,
            should_fail: false,
        }
    }

    /// Configure the mock to decode every chunk to a specific line.
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    /// Configure explicit segments instead of the single generated one.
    pub fn with_segments(mut self, segments: Vec<TranscriptionSegment>) -> Self {
        self.segments = Some(segments);
        self
    }

    /// Configure a synchronous inference delay.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Configure the mock to fail on transcribe.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// A factory producing independent copies of this mock, one per worker.
    pub fn into_factory(self) -> ModelFactory {
        Arc::new(move |_config| {
            Ok(Box::new(Self {
                model_name: self.model_name.clone(),
                text: self.text.clone(),
                segments: self.segments.clone(),
                latency: self.latency,
                should_fail: self.should_fail,
            }) as Box<dyn SpeechModel>)
        })
    }
}

impl SpeechModel for MockSpeechModel {
    fn transcribe(&mut self, samples: &[f32]) -> Result<TranscriptionResult> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if self.should_fail {
            return Err(SottoError::Processing {
                message: "mock transcription failure".to_string(),
            });
        }

        let duration_ms = (samples.len() as u64 * 1000) / defaults::SAMPLE_RATE as u64;
        let segments = match &self.segments {
            Some(segments) => segments.clone(),
            None if self.text.is_empty() => Vec::new(),
            None => vec![TranscriptionSegment {
                start_ms: 0,
                end_ms: duration_ms,
                text: self.text.clone(),
                confidence: 1.0,
                speaker: None,
            }],
        };

        Ok(TranscriptionResult {
            segments,
            duration_ms,
            language: "en".to_string(),
            model: self.model_name.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        !self.should_fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_model_returns_configured_text() {
        let mut model = MockSpeechModel::new("test-model").with_text("hello there");
        let result = model.transcribe(&vec![0.0; 16000]).unwrap();
        assert_eq!(result.text(), "hello there");
        assert_eq!(result.model, "test-model");
        assert_eq!(result.duration_ms, 1000);
    }

    #[test]
    fn test_mock_model_segment_spans_duration() {
        let mut model = MockSpeechModel::new("test-model");
        let result = model.transcribe(&vec![0.0; 32000]).unwrap();
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].start_ms, 0);
        assert_eq!(result.segments[0].end_ms, 2000);
        assert!(result.segments_in_bounds());
    }

    #[test]
    fn test_mock_model_failure() {
        let mut model = MockSpeechModel::new("test-model").with_failure();
        let result = model.transcribe(&vec![0.0; 100]);
        match result {
            Err(SottoError::Processing { message }) => {
                assert_eq!(message, "mock transcription failure");
            }
            other => panic!("Expected Processing error, got {other:?}"),
        }
        assert!(!model.is_ready());
    }

    #[test]
    fn test_mock_model_custom_segments() {
        let segments = vec![
            TranscriptionSegment {
                start_ms: 0,
                end_ms: 400,
                text: "first".to_string(),
                confidence: 0.8,
                speaker: Some(1),
            },
            TranscriptionSegment {
                start_ms: 400,
                end_ms: 900,
                text: "second".to_string(),
                confidence: 0.7,
                speaker: Some(2),
            },
        ];
        let mut model = MockSpeechModel::new("test-model").with_segments(segments.clone());
        let result = model.transcribe(&vec![0.0; 16000]).unwrap();
        assert_eq!(result.segments, segments);
    }

    #[test]
    fn test_mock_model_empty_text_yields_no_segments() {
        let mut model = MockSpeechModel::new("test-model").with_text("");
        let result = model.transcribe(&vec![0.0; 16000]).unwrap();
        assert!(result.segments.is_empty());
        assert!(result.segments_in_bounds());
    }

    #[test]
    fn test_factory_produces_independent_models() {
        let factory = MockSpeechModel::new("pooled").with_text("same").into_factory();
        let config = ModelConfig::default();
        let mut a = factory(&config).unwrap();
        let mut b = factory(&config).unwrap();
        assert_eq!(a.transcribe(&[0.0; 160]).unwrap().text(), "same");
        assert_eq!(b.transcribe(&[0.0; 160]).unwrap().text(), "same");
    }

    #[test]
    fn test_speech_model_trait_is_object_safe() {
        let mut model: Box<dyn SpeechModel> =
            Box::new(MockSpeechModel::new("boxed").with_text("boxed test"));
        assert_eq!(model.model_name(), "boxed");
        assert_eq!(model.transcribe(&[0.0; 16]).unwrap().text(), "boxed test");
    }
}

use crate::defaults;
use crate::error::{Result, SottoError};

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
/// Sources yield 32-bit float PCM at 16kHz mono, the format inference
/// consumes directly.
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Read whatever samples the source has buffered since the last read.
    ///
    /// An empty vector means no new audio; for finite sources it also
    /// means end of stream.
    fn read_samples(&mut self) -> Result<Vec<f32>>;
}

/// Configuration for audio source initialization
#[derive(Debug, Clone)]
pub struct AudioSourceConfig {
    pub sample_rate: u32,
}

impl Default for AudioSourceConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

/// Mock audio source for testing
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    reads: Vec<Vec<f32>>,
    next_read: usize,
    should_fail_start: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source with default settings
    pub fn new() -> Self {
        Self {
            is_started: false,
            reads: vec![vec![0.0; 160]],
            next_read: 0,
            should_fail_start: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the mock to return one batch of samples, then end of stream
    pub fn with_samples(mut self, samples: Vec<f32>) -> Self {
        self.reads = vec![samples];
        self
    }

    /// Configure the mock to return each batch in turn, then end of stream
    pub fn with_reads(mut self, reads: Vec<Vec<f32>>) -> Self {
        self.reads = reads;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(SottoError::AudioCapture {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.should_fail_read {
            return Err(SottoError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        match self.reads.get(self.next_read) {
            Some(samples) => {
                self.next_read += 1;
                Ok(samples.clone())
            }
            None => Ok(Vec::new()),
        }
    }
}

//! Real audio capture using CPAL (Cross-Platform Audio Library).

use crate::audio::recorder::AudioSource;
use crate::defaults;
use crate::error::{Result, SottoError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};

/// Preferred device names for desktop Linux environments.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Get the best default input device, preferring PipeWire/PulseAudio so the
/// desktop's device selection is respected.
fn get_best_default_device() -> Result<cpal::Device> {
    let host = cpal::default_host();

    if let Ok(devices) = host.input_devices() {
        for device in devices {
            if let Ok(name) = device.name()
                && is_preferred_device(&name)
            {
                return Ok(device);
            }
        }
    }

    host.default_input_device()
        .ok_or_else(|| SottoError::AudioCapture {
            message: "no default input device".to_string(),
        })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only accessed under the Mutex in CpalAudioSource,
/// so it never crosses thread boundaries unsynchronized.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Real audio capture implementation using CPAL.
///
/// Captures f32 PCM and converts to 16kHz mono. Tries the preferred format
/// first (f32/16kHz/mono), then falls back to the device's default config
/// with software downmixing and resampling.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Arc<Mutex<Option<SendableStream>>>,
    buffer: Arc<Mutex<Vec<f32>>>,
    source_rate: u32,
    source_channels: u16,
}

impl CpalAudioSource {
    /// Create a capture source on the best available input device.
    pub fn new() -> Result<Self> {
        let device = get_best_default_device()?;
        Self::with_device(device)
    }

    /// Create a capture source on a named input device.
    pub fn with_device_name(name: &str) -> Result<Self> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| SottoError::AudioCapture {
                message: format!("Failed to enumerate input devices: {e}"),
            })?;

        for device in devices {
            if device.name().is_ok_and(|n| n == name) {
                return Self::with_device(device);
            }
        }
        Err(SottoError::AudioCapture {
            message: format!("input device not found: {name}"),
        })
    }

    fn with_device(device: cpal::Device) -> Result<Self> {
        let preferred = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(defaults::SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let supports_preferred = device
            .supported_input_configs()
            .map(|mut configs| {
                configs.any(|c| {
                    c.channels() == 1
                        && c.sample_format() == cpal::SampleFormat::F32
                        && c.min_sample_rate().0 <= defaults::SAMPLE_RATE
                        && c.max_sample_rate().0 >= defaults::SAMPLE_RATE
                })
            })
            .unwrap_or(false);

        let (source_rate, source_channels) = if supports_preferred {
            (preferred.sample_rate.0, preferred.channels)
        } else {
            let default = device
                .default_input_config()
                .map_err(|e| SottoError::AudioCapture {
                    message: format!("Failed to query input config: {e}"),
                })?;
            (default.sample_rate().0, default.channels())
        };

        tracing::info!(
            device = device.name().unwrap_or_else(|_| "unknown".to_string()),
            source_rate,
            source_channels,
            "audio capture configured"
        );

        Ok(Self {
            device,
            stream: Arc::new(Mutex::new(None)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            source_rate,
            source_channels,
        })
    }

    /// Downmix interleaved channels and resample to 16kHz mono.
    fn convert(&self, raw: &[f32]) -> Vec<f32> {
        let mono: Vec<f32> = if self.source_channels > 1 {
            raw.chunks_exact(self.source_channels as usize)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        } else {
            raw.to_vec()
        };

        if self.source_rate == defaults::SAMPLE_RATE {
            return mono;
        }

        let ratio = self.source_rate as f64 / defaults::SAMPLE_RATE as f64;
        let output_len = (mono.len() as f64 / ratio).floor() as usize;
        (0..output_len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let idx = pos.floor() as usize;
                if idx + 1 >= mono.len() {
                    mono[idx.min(mono.len().saturating_sub(1))]
                } else {
                    let frac = (pos - idx as f64) as f32;
                    mono[idx] + (mono[idx + 1] - mono[idx]) * frac
                }
            })
            .collect()
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        let config = cpal::StreamConfig {
            channels: self.source_channels,
            sample_rate: cpal::SampleRate(self.source_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = self.buffer.clone();
        let stream = self
            .device
            .build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                move |e| {
                    tracing::warn!(error = %e, "audio stream error");
                },
                None,
            )
            .map_err(|e| SottoError::AudioCapture {
                message: format!("Failed to build input stream: {e}"),
            })?;

        stream.play().map_err(|e| SottoError::AudioCapture {
            message: format!("Failed to start input stream: {e}"),
        })?;

        let mut slot = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut slot = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        // Dropping the stream stops capture.
        *slot = None;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        let raw = {
            let mut buf = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *buf)
        };
        Ok(self.convert(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_device_matching() {
        assert!(is_preferred_device("pipewire"));
        assert!(is_preferred_device("PulseAudio Sound Server"));
        assert!(!is_preferred_device("hw:CARD=Generic,DEV=0"));
    }
}

//! Audio input: the `AudioSource` abstraction and its implementations.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod recorder;
pub mod wav;

#[cfg(feature = "cpal-audio")]
pub use capture::CpalAudioSource;
pub use recorder::{AudioSource, AudioSourceConfig, MockAudioSource};
pub use wav::WavAudioSource;

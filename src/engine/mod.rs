//! Inference engines and the binary interface they sit behind.
//!
//! Three layers:
//! - `abi`: the raw call interface of the compiled speech model
//! - `native`: `SpeechModel` implemented by marshaling over that interface
//! - `whisper`: `SpeechModel` implemented directly on whisper-rs
//!
//! Workers only ever see the `SpeechModel` trait.

pub mod abi;
pub mod model;
pub mod native;
pub mod whisper;

pub use abi::{MockAbi, NativeAbi, NativeImports, NativePtr};
pub use model::{MockSpeechModel, ModelFactory, SpeechModel};
pub use native::NativeSpeechModel;
pub use whisper::WhisperModel;

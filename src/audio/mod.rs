//! Audio capture plumbing: microphone → chunks → mono clip → WAV.
//!
//! # Flow
//!
//! ```text
//! AudioSource::open ──▶ DeviceLease (held while recording)
//!        │
//!        ▼ device callback
//! ChunkSink (Arc<Mutex<Vec<AudioChunk>>>)
//!        │  drained on stop
//!        ▼
//! AudioClip::assemble → downmix_to_mono → resample → encode_wav
//! ```

pub mod clip;
pub mod device;
pub mod resample;

pub use clip::{encode_wav, AudioClip};
pub use device::{AudioChunk, AudioSource, CaptureError, ChunkSink, CpalMicrophone, DeviceLease};
pub use resample::{downmix_to_mono, resample};

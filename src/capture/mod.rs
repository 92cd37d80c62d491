//! Capture pipelines that feed the composition buffer.
//!
//! * [`AudioPipeline`]: microphone recording and transcription.
//! * [`ImagePipeline`]: image selection and classification.
//!
//! Both pipelines only track state.  The backend calls they require are
//! returned as jobs and run by the session controller.

pub mod audio;
pub mod image;

pub use audio::{AudioPipeline, AudioState, StoppedRecording, TranscribeJob};
pub use image::{ClassifyJob, ImagePipeline, ImageState, SelectedFile, Upload};

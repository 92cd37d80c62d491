//! Microphone access via `cpal`.
//!
//! [`AudioSource::open`] claims the input device and starts appending
//! [`AudioChunk`]s to a shared sink.  The claim is represented by a
//! [`DeviceLease`]: dropping it (or calling [`DeviceLease::release`]) stops
//! the stream and frees the device, so every exit path of a recording
//! releases the hardware the same way.
//!
//! `cpal::Stream` is not `Send` on every platform, so [`CpalMicrophone`]
//! builds and drops the stream on a dedicated thread and the lease only
//! holds the means to stop that thread.

use std::fmt;
use std::sync::{mpsc, Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// A single buffer of raw audio as delivered by the device callback.
///
/// Samples are interleaved `f32` in the range `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Interleaved PCM samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate of this chunk in Hz (e.g. 44100, 48000, 16000).
    pub sample_rate: u32,
    /// Number of interleaved channels (1 = mono, 2 = stereo, …).
    pub channels: u16,
}

/// Chunks in arrival order, shared between the device callback and the
/// audio pipeline.  Lock only for a push or a drain.
pub type ChunkSink = Arc<Mutex<Vec<AudioChunk>>>;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while acquiring the input device.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device {0:?} not found")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("audio capture thread failed: {0}")]
    Thread(String),
}

// ---------------------------------------------------------------------------
// DeviceLease
// ---------------------------------------------------------------------------

/// Exclusive claim on an input device.  Released exactly once, on drop.
pub struct DeviceLease {
    label: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl DeviceLease {
    /// Wrap a release action; `release` runs when the lease is dropped.
    pub fn new(label: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            release: Some(Box::new(release)),
        }
    }

    /// Name of the device held by this lease.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Release the device now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            log::debug!("audio: releasing input device {:?}", self.label);
            release();
        }
    }
}

impl fmt::Debug for DeviceLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLease")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// AudioSource trait
// ---------------------------------------------------------------------------

/// Something that can hand out an exclusive microphone claim.
pub trait AudioSource: Send + Sync {
    /// Acquire the device and start appending chunks to `sink`.
    fn open(&self, sink: ChunkSink) -> Result<DeviceLease, CaptureError>;
}

// ---------------------------------------------------------------------------
// CpalMicrophone
// ---------------------------------------------------------------------------

/// Production [`AudioSource`] backed by the default `cpal` host.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    /// Input device name; `None` means the system default input.
    device_name: Option<String>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl AudioSource for CpalMicrophone {
    fn open(&self, sink: ChunkSink) -> Result<DeviceLease, CaptureError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<String, CaptureError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let device_name = self.device_name.clone();

        let worker = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let stream = match start_stream(device_name.as_deref(), sink) {
                    Ok((stream, label)) => {
                        let _ = ready_tx.send(Ok(label));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Park until the lease is released or dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        let label = ready_rx
            .recv()
            .map_err(|_| CaptureError::Thread("capture thread exited before start".into()))??;

        log::info!("audio: acquired input device {label:?}");
        Ok(DeviceLease::new(label, move || {
            let _ = stop_tx.send(());
            let _ = worker.join();
        }))
    }
}

fn push_chunk(sink: &ChunkSink, samples: Vec<f32>, sample_rate: u32, channels: u16) {
    if let Ok(mut chunks) = sink.lock() {
        chunks.push(AudioChunk {
            samples,
            sample_rate,
            channels,
        });
    }
}

fn on_stream_error(err: cpal::StreamError) {
    log::error!("cpal stream error: {err}");
}

fn start_stream(
    device_name: Option<&str>,
    sink: ChunkSink,
) -> Result<(cpal::Stream, String), CaptureError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()?
            .find(|d| d.name().is_ok_and(|n| n == name))
            .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))?,
        None => host.default_input_device().ok_or(CaptureError::NoDevice)?,
    };
    let label = device.name().unwrap_or_else(|_| "unknown input".into());

    let supported = device.default_input_config()?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let stream = match format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                push_chunk(&sink, data.to_vec(), sample_rate, channels);
            },
            on_stream_error,
            None,
        )?,
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples = data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                push_chunk(&sink, samples, sample_rate, channels);
            },
            on_stream_error,
            None,
        )?,
        other => return Err(CaptureError::UnsupportedFormat(format!("{other:?}"))),
    };

    stream.play()?;
    Ok((stream, label))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Voice capture state machine.
//!
//! ```text
//! Idle ──start──▶ Recording ──stop──▶ Idle ──submit──▶ Transcribing ──complete──▶ Idle
//!                     └──cancel──▶ Idle     └──submit (empty / too short)──▶ Idle
//! ```
//!
//! Opening and releasing the device block (the cpal stream lives on its own
//! thread), so the pipeline never touches the hardware itself.  [`prepare`]
//! hands out the source and sink, the caller opens the device off the async
//! runtime and passes the outcome to [`start`].  On the way out, [`stop`] and
//! [`cancel`] move the [`DeviceLease`] out in a [`StoppedRecording`]; the
//! caller drops it off the runtime before [`submit`] drains the sink.
//! Dropping the pipeline while recording still releases the device through
//! the lease's own `Drop`.
//!
//! [`prepare`]: AudioPipeline::prepare
//! [`start`]: AudioPipeline::start
//! [`stop`]: AudioPipeline::stop
//! [`cancel`]: AudioPipeline::cancel
//! [`submit`]: AudioPipeline::submit

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::audio::{AudioClip, AudioSource, CaptureError, ChunkSink, DeviceLease};
use crate::session::ControllerError;

/// Externally visible phase of the audio pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioState {
    #[default]
    Idle,
    Recording,
    Transcribing,
}

impl AudioState {
    /// A short label suitable for a status line.
    pub fn label(&self) -> &'static str {
        match self {
            AudioState::Idle => "idle",
            AudioState::Recording => "recording",
            AudioState::Transcribing => "transcribing",
        }
    }

    pub fn is_busy(&self) -> bool {
        !matches!(self, AudioState::Idle)
    }
}

enum Phase {
    Idle,
    Recording {
        lease: DeviceLease,
        sink: ChunkSink,
        generation: u64,
        started: Instant,
    },
    Transcribing {
        generation: u64,
    },
}

/// A finished clip ready to be submitted for transcription.
#[derive(Debug)]
pub struct TranscribeJob {
    /// Session generation the recording started in.
    pub generation: u64,
    pub clip: AudioClip,
}

/// A recording taken out of `Recording`.  Dropping `lease` frees the device.
#[derive(Debug)]
pub struct StoppedRecording {
    pub lease: DeviceLease,
    pub sink: ChunkSink,
    pub generation: u64,
}

pub struct AudioPipeline {
    phase: Phase,
    source: Arc<dyn AudioSource>,
    target_rate: u32,
    min_recording_secs: f32,
}

impl AudioPipeline {
    pub fn new(source: Arc<dyn AudioSource>, target_rate: u32, min_recording_secs: f32) -> Self {
        Self {
            phase: Phase::Idle,
            source,
            target_rate,
            min_recording_secs,
        }
    }

    pub fn state(&self) -> AudioState {
        match self.phase {
            Phase::Idle => AudioState::Idle,
            Phase::Recording { .. } => AudioState::Recording,
            Phase::Transcribing { .. } => AudioState::Transcribing,
        }
    }

    fn reject(&self, action: &'static str) -> ControllerError {
        ControllerError::InvalidState {
            action,
            state: self.state().label(),
        }
    }

    /// The source to open and a fresh sink for it.  Valid only from `Idle`.
    pub fn prepare(&self) -> Result<(Arc<dyn AudioSource>, ChunkSink), ControllerError> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(self.reject("start recording"));
        }
        Ok((Arc::clone(&self.source), Arc::new(Mutex::new(Vec::new()))))
    }

    /// Enter `Recording` with the outcome of opening the device.  A denied
    /// device leaves the pipeline `Idle`.
    pub fn start(
        &mut self,
        opened: Result<DeviceLease, CaptureError>,
        sink: ChunkSink,
        generation: u64,
    ) -> Result<(), ControllerError> {
        let lease = opened.map_err(|e| ControllerError::DeviceUnavailable(e.to_string()))?;
        if !matches!(self.phase, Phase::Idle) {
            return Err(self.reject("start recording"));
        }

        log::debug!("capture: Idle → Recording on {:?}", lease.label());
        self.phase = Phase::Recording {
            lease,
            sink,
            generation,
            started: Instant::now(),
        };
        Ok(())
    }

    /// Leave `Recording` so the clip can be submitted.
    pub fn stop(&mut self) -> Result<StoppedRecording, ControllerError> {
        self.take_recording("stop recording")
    }

    /// Leave `Recording` discarding the audio.
    pub fn cancel(&mut self) -> Result<StoppedRecording, ControllerError> {
        let stopped = self.take_recording("cancel recording")?;
        log::debug!("capture: recording cancelled");
        Ok(stopped)
    }

    /// Drain `sink` into a clip.  Valid only from `Idle`, after the lease of
    /// the stopped recording has been released.
    ///
    /// On success the pipeline is `Transcribing` and the returned job must be
    /// submitted.  An empty or too-short recording leaves the pipeline `Idle`
    /// with an error instead.
    pub fn submit(
        &mut self,
        sink: &ChunkSink,
        generation: u64,
    ) -> Result<TranscribeJob, ControllerError> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(self.reject("stop recording"));
        }

        let chunks = match sink.lock() {
            Ok(mut chunks) => std::mem::take(&mut *chunks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        let clip = AudioClip::assemble(&chunks, self.target_rate)
            .ok_or(ControllerError::EmptyRecording)?;
        if clip.duration_secs < self.min_recording_secs {
            return Err(ControllerError::RecordingTooShort {
                secs: clip.duration_secs,
                min_secs: self.min_recording_secs,
            });
        }

        log::debug!(
            "capture: Idle → Transcribing ({:.2}s, {} bytes)",
            clip.duration_secs,
            clip.wav.len()
        );
        self.phase = Phase::Transcribing { generation };
        Ok(TranscribeJob { generation, clip })
    }

    /// Transcription resolved (either way).  Returns the generation the
    /// recording belonged to, or `None` if no transcription was pending.
    pub fn complete(&mut self) -> Option<u64> {
        match self.phase {
            Phase::Transcribing { generation } => {
                self.phase = Phase::Idle;
                log::debug!("capture: Transcribing → Idle");
                Some(generation)
            }
            _ => None,
        }
    }

    /// The single way out of `Recording`.  The lease travels with the
    /// returned value, so the device stays claimed until the caller drops it.
    fn take_recording(
        &mut self,
        action: &'static str,
    ) -> Result<StoppedRecording, ControllerError> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Recording {
                lease,
                sink,
                generation,
                started,
            } => {
                log::debug!(
                    "capture: recorded for {:.2}s",
                    started.elapsed().as_secs_f32()
                );
                Ok(StoppedRecording {
                    lease,
                    sink,
                    generation,
                })
            }
            other => {
                self.phase = other;
                Err(self.reject(action))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Error taxonomy of the session controller.
//!
//! None of these is fatal: operations that fail leave the controller in a
//! state from which the same operation can simply be retried.

use thiserror::Error;

use super::model::ThreadId;
use crate::backend::{BackendError, Capability};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControllerError {
    /// The microphone could not be acquired (permission or hardware).
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A switch targeted a thread that is not in the roster.
    #[error("thread not found: {0}")]
    ThreadNotFound(ThreadId),

    /// The thread listing could not be fetched or decoded.
    #[error("thread roster unavailable: {0}")]
    RosterUnavailable(#[source] BackendError),

    /// A backend call failed; the controller fell back or kept prior state.
    #[error("{capability} failed: {source}")]
    Transport {
        capability: Capability,
        #[source]
        source: BackendError,
    },

    /// The operation is not valid in the pipeline's current state.
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    /// Recording stopped before any audio arrived.
    #[error("no audio was captured")]
    EmptyRecording,

    /// Recording stopped before the configured minimum length.
    #[error("recording too short ({secs:.2}s, minimum {min_secs:.2}s)")]
    RecordingTooShort { secs: f32, min_secs: f32 },

    /// The selected file cannot be sent as an image.
    #[error("unsupported file: {0}")]
    UnsupportedFile(String),
}

impl ControllerError {
    pub(crate) fn transport(capability: Capability, source: BackendError) -> Self {
        Self::Transport { capability, source }
    }
}

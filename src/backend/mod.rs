//! Backend capabilities consumed by the session controller.
//!
//! This module provides:
//! * [`Backend`]: async trait covering every call the controller makes.
//! * [`HttpBackend`]: `reqwest` implementation against the assistant's
//!   HTTP API.
//! * [`BackendError`]: transport, status and shape errors.
//! * Explicit result shapes ([`Prediction`], [`Report`], [`Transcription`])
//!   and the [`ResetRequest`] payload.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use annapoorna_client::backend::{Backend, HttpBackend};
//! use annapoorna_client::config::AppConfig;
//! use annapoorna_client::session::UserId;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = HttpBackend::from_config(&AppConfig::default()).unwrap();
//!     let threads = backend.list_threads(&UserId::from("665f1c")).await.unwrap();
//!     println!("{} threads", threads.len());
//! }
//! ```

pub mod http;
pub mod types;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::audio::AudioClip;
use crate::capture::SelectedFile;
use crate::session::{Context, Thread, ThreadId, UserId};

pub use http::HttpBackend;
pub use types::{Prediction, Report, ResetRequest, Transcription};

// ---------------------------------------------------------------------------
// BackendError
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to the backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("backend request timed out")]
    Timeout,

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body was not valid JSON.
    #[error("failed to parse backend response: {0}")]
    Parse(String),

    /// The response was JSON but not of the expected shape.
    #[error("malformed backend response: {0}")]
    Malformed(String),

    /// The configured base URL cannot address the backend's endpoints.
    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),

    /// A path parameter that URL normalisation would drop (`.` or `..`).
    #[error("{0:?} cannot be sent as a URL path segment")]
    UnaddressableSegment(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_decode() {
            BackendError::Parse(e.to_string())
        } else {
            BackendError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Names each backend call, so transport failures can say which one failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ListThreads,
    FetchThread,
    PushContext,
    LatestReport,
    ResetMemory,
    ClassifyImage,
    Transcribe,
    ChatReply,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::ListThreads => "list threads",
            Capability::FetchThread => "fetch thread",
            Capability::PushContext => "push context",
            Capability::LatestReport => "fetch latest report",
            Capability::ResetMemory => "reset memory",
            Capability::ClassifyImage => "classify image",
            Capability::Transcribe => "transcribe audio",
            Capability::ChatReply => "chat reply",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Everything the controller needs from the assistant backend.
///
/// Implementors must be `Send + Sync` so they can be shared with spawned
/// tasks behind an `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// All threads of `user`, in roster order.
    async fn list_threads(&self, user: &UserId) -> Result<Vec<Thread>, BackendError>;

    /// One thread by identifier.
    async fn fetch_thread(&self, id: &ThreadId) -> Result<Thread, BackendError>;

    /// Load `context` into the backend's shared inference state.
    async fn push_context(&self, context: &Context) -> Result<(), BackendError>;

    /// The newest generated report for `user`, if there is one.
    async fn latest_report(&self, user: &UserId) -> Result<Option<Report>, BackendError>;

    /// Archive the given conversation and clear the backend's memory.
    async fn reset_memory(&self, request: &ResetRequest) -> Result<String, BackendError>;

    /// Classify an uploaded image.
    async fn classify_image(&self, file: &SelectedFile) -> Result<Prediction, BackendError>;

    /// Transcribe a recorded clip.
    async fn transcribe(&self, clip: &AudioClip) -> Result<Transcription, BackendError>;

    /// Reply to `prompt` using the backend's conversational memory.
    async fn chat(&self, prompt: &str) -> Result<String, BackendError>;
}

// Compile-time assertion: Box<dyn Backend> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn Backend>) {}
};

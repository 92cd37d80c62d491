//! The pending outgoing message.
//!
//! Typing, the audio pipeline and the image pipeline all write here; the
//! dispatcher drains it.  Text writes are last-writer-wins: a transcript
//! replaces whatever was typed before it.

use crate::backend::Prediction;
use crate::session::ImageRef;

/// An image waiting to be sent, with the advisory classification result.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub image: ImageRef,
    /// `None` when the classify call failed; the image is still sendable.
    pub prediction: Option<Prediction>,
}

impl Attachment {
    pub fn new(image: ImageRef, prediction: Option<Prediction>) -> Self {
        Self { image, prediction }
    }

    fn is_empty(&self) -> bool {
        self.image.as_str().trim().is_empty()
    }
}

/// What [`CompositionBuffer::take`] hands to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    /// Trimmed text, possibly empty when only an image is attached.
    pub text: String,
    pub attachment: Option<Attachment>,
}

/// Mutable until dispatch, then cleared in one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositionBuffer {
    text: String,
    attachment: Option<Attachment>,
}

impl CompositionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    /// Overwrite the text field.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Replace the pending attachment; only one may be pending at a time.
    pub fn attach(&mut self, attachment: Attachment) {
        self.attachment = Some(attachment);
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.attachment = None;
    }

    /// `true` when there is non-blank text or a non-empty attachment.
    pub fn is_sendable(&self) -> bool {
        !self.text.trim().is_empty() || self.attachment.as_ref().is_some_and(|a| !a.is_empty())
    }

    /// Drain the buffer into a [`Draft`].
    ///
    /// Returns `None` and leaves the buffer untouched when there is nothing
    /// to send.
    pub fn take(&mut self) -> Option<Draft> {
        if !self.is_sendable() {
            return None;
        }
        let draft = Draft {
            text: self.text.trim().to_string(),
            attachment: self.attachment.take().filter(|a| !a.is_empty()),
        };
        self.clear();
        Some(draft)
    }
}

//! Session data model: users, threads, messages, context and image
//! references.
//!
//! Identifiers and the context blob are newtypes over `String` so they cannot
//! be swapped by accident.  [`Message`] serialises in the backend's wire
//! shape (`{"type": "user" | "bot", "text": …, "image": …}`) because the same
//! value travels back to the backend in the reset audit payload.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_newtype!(
    /// Opaque user identifier established by the external login flow.
    UserId
);

string_newtype!(
    /// Backend-assigned thread identifier.
    ThreadId
);

string_newtype!(
    /// Reference to a locally selected image, suitable for display.
    ImageRef
);

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Opaque conversational memory the backend associates with a thread.
///
/// The empty string is the defined "no context" value; it is what a new
/// session falls back to when no report can be fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(String);

impl Context {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The explicit empty context.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<&str> for Context {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Who authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "bot", alias = "assistant")]
    Assistant,
}

/// One entry of a thread's history.  Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub origin: Origin,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "image", default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<ImageRef>,
}

impl Message {
    pub fn user(text: impl Into<String>, attachment: Option<ImageRef>) -> Self {
        Self {
            origin: Origin::User,
            text: text.into(),
            attachment,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            origin: Origin::Assistant,
            text: text.into(),
            attachment: None,
        }
    }

    pub fn is_user(&self) -> bool {
        self.origin == Origin::User
    }
}

// ---------------------------------------------------------------------------
// Thread
// ---------------------------------------------------------------------------

/// One addressable conversation with its own history and context.
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub id: ThreadId,
    pub display_name: String,
    pub messages: Vec<Message>,
    pub context: Context,
}

impl Thread {
    pub fn summary(&self) -> ThreadSummary {
        ThreadSummary {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            message_count: self.messages.len(),
        }
    }
}

/// Roster entry as shown in a thread picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSummary {
    pub id: ThreadId,
    pub display_name: String,
    pub message_count: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

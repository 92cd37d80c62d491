//! Session & multi-channel input controller.
//!
//! * [`model`]: threads, messages, context and identifiers.
//! * [`store`]: the in-memory roster.
//! * [`state`]: the owned state container and its transitions.
//! * [`controller`]: runs backend calls and applies their completions.

pub mod controller;
pub mod error;
pub mod model;
pub mod state;
pub mod store;

pub use controller::SessionController;
pub use error::ControllerError;
pub use model::{Context, ImageRef, Message, Origin, Thread, ThreadId, ThreadSummary, UserId};
pub use state::{Applied, Completion, Effect, Event, SessionState};
pub use store::SessionStore;

//! Outgoing message composition and dispatch bookkeeping.
//!
//! * [`CompositionBuffer`]: text + optional image waiting to be sent.
//! * [`DispatchLanes`]: per-conversation FIFO of turns awaiting a reply.
//! * [`place_reply`]: keeps each reply adjacent to its own user message.

pub mod buffer;
pub mod dispatch;

pub use buffer::{Attachment, CompositionBuffer, Draft};
pub use dispatch::{place_reply, DispatchLanes, LaneKey, Resolved, Turn};

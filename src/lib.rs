//! Conversational client for the Annapoorna crop assistant.
//!
//! The [`session::SessionController`] keeps track of the user's chat
//! threads and coordinates three input channels (typed text, image upload,
//! voice) that all feed one composition buffer.  Backend calls go through
//! the [`backend::Backend`] trait; [`backend::HttpBackend`] talks to the
//! assistant's HTTP API.

pub mod audio;
pub mod backend;
pub mod capture;
pub mod compose;
pub mod config;
pub mod session;

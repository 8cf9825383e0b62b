//! `CareChat` relay library.
//!
//! Serves the two collaborators the client synchronizes against: the
//! authenticated streaming endpoint (`/ws`) that relays messages between
//! participants, and the conversation history endpoint
//! (`GET /chat/conversation`).

pub mod assistant;
pub mod auth;
pub mod config;
pub mod history;
pub mod relay;
pub mod store;

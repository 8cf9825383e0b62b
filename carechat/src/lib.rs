//! `CareChat`: two-party conversation sync and live delivery.
//!
//! The client side of the subsystem: a [`session::Session`] owns one live
//! channel, [`scope::ConversationScope`] switches between chat partners,
//! and [`buffer::ReconciliationBuffer`] merges loaded history with the
//! live stream into the sequence the presentation layer renders.

pub mod buffer;
pub mod channel;
pub mod config;
pub mod history;
pub mod scope;
pub mod session;

//! Shared protocol definitions for the `CareChat` wire format.

pub mod codec;
pub mod conversation;
pub mod event;
pub mod message;
pub mod participant;

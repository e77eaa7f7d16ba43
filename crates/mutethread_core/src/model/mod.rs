//! Domain model for messages, addressing and mute decisions.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Keep the mute decision rule free of storage concerns.
//!
//! # Invariants
//! - Every stored message is identified by a stable `MessageId`.
//! - Tags are only ever added by the propagation core.

pub mod addressing;
pub mod message;
pub mod mute;

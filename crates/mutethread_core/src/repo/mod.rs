//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the message store contract consumed by mute propagation.
//! - Isolate SQLite query details from service/business orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `Query`) in
//!   addition to DB transport errors.

pub mod message_repo;

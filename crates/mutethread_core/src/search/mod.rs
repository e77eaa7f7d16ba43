//! Query language used to select messages and conversations.
//!
//! # Responsibility
//! - Parse store query strings (`tag:`, `to:`, boolean operators).
//! - Compile parsed queries into parameterized SQL for the message store.

pub mod query;

//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate store calls into mute selection and propagation.
//! - Keep the CLI decoupled from storage details.

pub mod mute_service;

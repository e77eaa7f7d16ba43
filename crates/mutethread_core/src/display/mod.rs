//! Human-readable views over stored conversations.

pub mod thread_view;

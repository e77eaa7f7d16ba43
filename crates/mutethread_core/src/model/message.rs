//! Message domain model.
//!
//! # Responsibility
//! - Define identifiers and insert shapes for messages held by the store.
//!
//! # Invariants
//! - `MessageId` is stable and never reused for another message.
//! - `message_id` (the RFC 5322 `Message-ID`) is unique within one store and
//!   kept without angle brackets.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable store-side identifier of one message.
pub type MessageId = Uuid;

/// Insert shape for one message, as produced by the importer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// RFC 5322 `Message-ID`, without angle brackets.
    pub message_id: String,
    /// `In-Reply-To` target, without angle brackets.
    pub in_reply_to: Option<String>,
    /// `References` chain, oldest first, without angle brackets.
    pub references: Vec<String>,
    /// Unix epoch seconds. `0` when the message carries no usable `Date`.
    pub date: i64,
    /// Top-level headers in source order, values unfolded.
    pub headers: Vec<(String, String)>,
    /// Tags applied at insert time.
    pub tags: Vec<String>,
}

impl NewMessage {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            ..Self::default()
        }
    }

    pub fn in_reply_to(mut self, parent: impl Into<String>) -> Self {
        self.in_reply_to = Some(parent.into());
        self
    }

    pub fn date(mut self, date: i64) -> Self {
        self.date = date;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Message-IDs that may name this message's parent, nearest first.
    ///
    /// `In-Reply-To` comes first, then `References` from newest to oldest.
    pub fn parent_candidates(&self) -> Vec<&str> {
        let mut candidates = Vec::with_capacity(self.references.len() + 1);
        if let Some(parent) = self.in_reply_to.as_deref() {
            candidates.push(parent);
        }
        for reference in self.references.iter().rev() {
            if !candidates.contains(&reference.as_str()) {
                candidates.push(reference.as_str());
            }
        }
        candidates.retain(|candidate| *candidate != self.message_id);
        candidates
    }
}

//! Conversation tree rendering for diagnostics.
//!
//! # Responsibility
//! - Flatten a conversation into indented lines with mute/addressing markers.
//!
//! # Invariants
//! - Rendering never mutates the store.
//! - Lines are emitted in depth-first pre-order, replies in date order.

use crate::model::addressing::{AddressMatcher, AddressingLevel};
use crate::model::message::MessageId;
use crate::model::mute::MuteTags;
use crate::repo::message_repo::{MessageStore, RepoResult};
use std::fmt::{Display, Formatter};

/// Mute state marker shown for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteMarker {
    /// Carries the command tag (`M`).
    Command,
    /// Carries the muted tag only (`m`).
    Muted,
    /// Neither.
    Clear,
}

impl MuteMarker {
    pub fn as_char(self) -> char {
        match self {
            Self::Command => 'M',
            Self::Muted => 'm',
            Self::Clear => ' ',
        }
    }
}

/// One rendered message line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadLine {
    pub id: MessageId,
    pub depth: usize,
    pub mute: MuteMarker,
    pub addressing: AddressingLevel,
    pub subject: String,
}

impl Display for ThreadLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}<{}{}> {}",
            "  ".repeat(self.depth),
            self.mute.as_char(),
            self.addressing.marker(),
            self.subject
        )
    }
}

/// Renders the conversation under `root`.
pub fn render_thread<S: MessageStore + ?Sized>(
    store: &S,
    matcher: &AddressMatcher,
    tags: &MuteTags,
    root: MessageId,
) -> RepoResult<Vec<ThreadLine>> {
    let mut lines = Vec::new();
    let mut stack = vec![(root, 0usize)];

    while let Some((node, depth)) = stack.pop() {
        let node_tags = store.tags(node)?;
        let mute = if node_tags.contains(&tags.command) {
            MuteMarker::Command
        } else if node_tags.contains(&tags.muted) {
            MuteMarker::Muted
        } else {
            MuteMarker::Clear
        };
        let addressing =
            matcher.addressing_level(&store.header(node, "To")?, &store.header(node, "Cc")?);
        lines.push(ThreadLine {
            id: node,
            depth,
            mute,
            addressing,
            subject: store.header(node, "Subject")?,
        });

        let replies = store.replies(node)?;
        stack.extend(replies.into_iter().rev().map(|reply| (reply, depth + 1)));
    }

    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::{MuteMarker, ThreadLine};
    use crate::model::addressing::AddressingLevel;
    use uuid::Uuid;

    #[test]
    fn line_shows_indent_markers_and_subject() {
        let line = ThreadLine {
            id: Uuid::new_v4(),
            depth: 2,
            mute: MuteMarker::Muted,
            addressing: AddressingLevel::Cc,
            subject: "Re: plans".to_string(),
        };
        assert_eq!(line.to_string(), "    <mc> Re: plans");
    }

    #[test]
    fn clear_unaddressed_line_uses_blank_markers() {
        let line = ThreadLine {
            id: Uuid::new_v4(),
            depth: 0,
            mute: MuteMarker::Clear,
            addressing: AddressingLevel::None,
            subject: "hello".to_string(),
        };
        assert_eq!(line.to_string(), "<  > hello");
    }
}

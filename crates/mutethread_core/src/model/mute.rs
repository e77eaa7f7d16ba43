//! Mute decision model.
//!
//! # Responsibility
//! - Define the tag labels that drive and record mute propagation.
//! - Own the per-message mute decision rule.
//!
//! # Invariants
//! - A command-tagged message is always muted.
//! - A root is never muted by inheritance.
//! - A reply inherits mute only while it addresses the target no more
//!   strongly than its parent did.

use super::addressing::AddressingLevel;
use serde::{Deserialize, Serialize};

pub const DEFAULT_COMMAND_TAG: &str = "mute-thread";
pub const DEFAULT_MUTED_TAG: &str = "thread-muted";
pub const DEFAULT_PROCESSED_TAG: &str = "mute-processed";

/// Tag labels used by mute propagation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteTags {
    /// Applied by a human to request muting from that message down.
    pub command: String,
    /// Derived output consumed by mail client filters.
    pub muted: String,
    /// Internal bookkeeping marker, never removed.
    pub processed: String,
}

impl Default for MuteTags {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND_TAG.to_string(),
            muted: DEFAULT_MUTED_TAG.to_string(),
            processed: DEFAULT_PROCESSED_TAG.to_string(),
        }
    }
}

/// Context a message inherits from its position in the reply tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentContext {
    /// The message is a conversation root and has no parent.
    Root,
    /// The message replies to a parent with this computed state.
    Reply {
        muted: bool,
        addressing: AddressingLevel,
    },
}

impl ParentContext {
    pub fn is_muted(self) -> bool {
        matches!(self, Self::Reply { muted: true, .. })
    }
}

/// Decides whether one message is muted.
///
/// Precedence: own command tag, then inherited mute gated by addressing,
/// otherwise unmuted.
pub fn decide_mute(
    command_tagged: bool,
    parent: ParentContext,
    addressing: AddressingLevel,
) -> bool {
    if command_tagged {
        return true;
    }
    match parent {
        // Unreachable from a real run: roots never have a muted parent.
        ParentContext::Root => false,
        ParentContext::Reply {
            muted: true,
            addressing: parent_addressing,
        } => addressing <= parent_addressing,
        ParentContext::Reply { muted: false, .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{decide_mute, AddressingLevel, MuteTags, ParentContext};

    const LEVELS: [AddressingLevel; 3] = [
        AddressingLevel::None,
        AddressingLevel::Cc,
        AddressingLevel::To,
    ];

    #[test]
    fn command_tag_always_mutes() {
        for own in LEVELS {
            assert!(decide_mute(true, ParentContext::Root, own));
            for parent in LEVELS {
                for muted in [false, true] {
                    let ctx = ParentContext::Reply {
                        muted,
                        addressing: parent,
                    };
                    assert!(decide_mute(true, ctx, own));
                }
            }
        }
    }

    #[test]
    fn root_is_never_muted_by_inheritance() {
        for own in LEVELS {
            assert!(!decide_mute(false, ParentContext::Root, own));
        }
    }

    #[test]
    fn reply_inherits_only_without_stronger_addressing() {
        for own in LEVELS {
            for parent in LEVELS {
                let muted_parent = ParentContext::Reply {
                    muted: true,
                    addressing: parent,
                };
                assert_eq!(decide_mute(false, muted_parent, own), own <= parent);

                let unmuted_parent = ParentContext::Reply {
                    muted: false,
                    addressing: parent,
                };
                assert!(!decide_mute(false, unmuted_parent, own));
            }
        }
    }

    #[test]
    fn default_tags_match_mail_client_conventions() {
        let tags = MuteTags::default();
        assert_eq!(tags.command, "mute-thread");
        assert_eq!(tags.muted, "thread-muted");
        assert_eq!(tags.processed, "mute-processed");
    }
}

//! Mute propagation use-case service.
//!
//! # Responsibility
//! - Select conversations that still need mute processing.
//! - Walk each selected conversation and apply muted/processed tags.
//!
//! # Invariants
//! - Every selection issues a fresh store query.
//! - Every descendant of a selected root is visited and re-decided, whether
//!   or not an earlier run processed it.
//! - Tags are only added; the first store failure aborts the run.

use crate::db::{open_db, OpenMode};
use crate::model::addressing::{AddressMatch, AddressMatcher, AddressingLevel};
use crate::model::message::MessageId;
use crate::model::mute::{decide_mute, MuteTags, ParentContext};
use crate::repo::message_repo::{MessageStore, RepoError};
use log::{debug, error, info};
use rusqlite::Connection;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Instant;

pub type MuteResult<T> = Result<T, MuteError>;

/// Failure that aborts a mute run.
#[derive(Debug)]
pub enum MuteError {
    /// Store could not be opened (bad path, permissions, schema).
    StoreOpen(RepoError),
    /// Selection query is malformed or could not run.
    Query(RepoError),
    /// Tags, headers or replies of a message could not be read.
    Read { message: MessageId, source: RepoError },
    /// Store rejected a tag mutation.
    TagWrite {
        message: MessageId,
        tag: String,
        source: RepoError,
    },
}

impl Display for MuteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StoreOpen(err) => write!(f, "cannot open message store: {err}"),
            Self::Query(err) => write!(f, "cannot select conversations: {err}"),
            Self::Read { message, source } => {
                write!(f, "cannot read message {message}: {source}")
            }
            Self::TagWrite {
                message,
                tag,
                source,
            } => write!(f, "cannot add tag `{tag}` to message {message}: {source}"),
        }
    }
}

impl Error for MuteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StoreOpen(err) => Some(err),
            Self::Query(err) => Some(err),
            Self::Read { source, .. } => Some(source),
            Self::TagWrite { source, .. } => Some(source),
        }
    }
}

/// Opens the message store at `path` for a mute run.
///
/// # Errors
/// - [`MuteError::StoreOpen`] for a missing file, bad permissions or an
///   unsupported schema.
pub fn open_store(path: impl AsRef<Path>, mode: OpenMode) -> MuteResult<Connection> {
    open_db(path, mode).map_err(|err| MuteError::StoreOpen(RepoError::Db(err)))
}

/// Settings for one mute run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuteConfig {
    /// Address whose To/Cc presence gates inheritance.
    pub target_address: String,
    pub address_match: AddressMatch,
    pub tags: MuteTags,
}

impl MuteConfig {
    pub fn new(target_address: impl Into<String>) -> Self {
        Self {
            target_address: target_address.into(),
            address_match: AddressMatch::default(),
            tags: MuteTags::default(),
        }
    }
}

/// Counters for one propagated conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PropagationStats {
    /// Messages visited, including already-processed ones.
    pub visited: u64,
    /// Messages decided muted in this walk.
    pub muted: u64,
    /// Muted tags that were not present before.
    pub muted_added: u64,
    /// Processed markers that were not present before.
    pub processed_added: u64,
}

impl PropagationStats {
    fn absorb(&mut self, other: PropagationStats) {
        self.visited += other.visited;
        self.muted += other.muted;
        self.muted_added += other.muted_added;
        self.processed_added += other.processed_added;
    }
}

/// Summary of a full run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MuteReport {
    /// Query used for selection.
    pub query: String,
    /// Selected conversation roots in processing order.
    pub roots: Vec<MessageId>,
    pub totals: PropagationStats,
}

/// Mute service facade over a message store.
pub struct MuteService<S: MessageStore> {
    store: S,
    tags: MuteTags,
    matcher: AddressMatcher,
}

impl<S: MessageStore> MuteService<S> {
    pub fn new(store: S, config: MuteConfig) -> Self {
        let matcher = AddressMatcher::new(config.target_address, config.address_match);
        Self {
            store,
            tags: config.tags,
            matcher,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn tags(&self) -> &MuteTags {
        &self.tags
    }

    pub fn matcher(&self) -> &AddressMatcher {
        &self.matcher
    }

    /// Builds the selection query.
    ///
    /// Blank `extra_filter` adds nothing; otherwise it is appended verbatim
    /// inside parentheses as one more conjunct.
    pub fn candidate_query(&self, extra_filter: &str) -> String {
        let mut query = format!(
            "tag:{} AND NOT tag:{}",
            quote_term(&self.tags.command),
            quote_term(&self.tags.processed)
        );
        let extra = extra_filter.trim();
        if !extra.is_empty() {
            query.push_str(" AND (");
            query.push_str(extra);
            query.push(')');
        }
        query
    }

    /// Returns roots of conversations with a command-tagged message and an
    /// unprocessed message, narrowed by `extra_filter`.
    ///
    /// # Errors
    /// - [`MuteError::Query`] when the filter is malformed or the query fails.
    pub fn select_candidate_roots(&self, extra_filter: &str) -> MuteResult<Vec<MessageId>> {
        let query_string = self.candidate_query(extra_filter);
        let query = self.store.query(&query_string).map_err(MuteError::Query)?;
        let roots = self.store.search_roots(query).map_err(MuteError::Query)?;
        debug!(
            "event=mute_select module=service status=ok roots={}",
            roots.len()
        );
        Ok(roots)
    }

    /// Walks the conversation under `root` and applies the mute decision
    /// and processed marker to every message.
    ///
    /// Traversal is depth-first pre-order over an explicit stack.
    pub fn propagate(&self, root: MessageId) -> MuteResult<PropagationStats> {
        let mut stats = PropagationStats::default();
        let mut stack = vec![(root, ParentContext::Root)];

        while let Some((node, parent)) = stack.pop() {
            let tags = self.store.tags(node).map_err(|source| MuteError::Read {
                message: node,
                source,
            })?;
            let addressing = self.addressing_level(node)?;
            let command_tagged = tags.contains(&self.tags.command);
            let muted = decide_mute(command_tagged, parent, addressing);
            debug!(
                "event=mute_decide module=service message_uuid={} command={} parent_muted={} addressing={:?} muted={}",
                node,
                command_tagged,
                parent.is_muted(),
                addressing,
                muted
            );

            if muted {
                self.add_tag(node, &self.tags.muted)?;
                stats.muted += 1;
                if !tags.contains(&self.tags.muted) {
                    stats.muted_added += 1;
                }
            }
            self.add_tag(node, &self.tags.processed)?;
            if !tags.contains(&self.tags.processed) {
                stats.processed_added += 1;
            }
            stats.visited += 1;

            let replies = self.store.replies(node).map_err(|source| MuteError::Read {
                message: node,
                source,
            })?;
            let context = ParentContext::Reply { muted, addressing };
            // Reversed so the first reply is popped first.
            stack.extend(replies.into_iter().rev().map(|reply| (reply, context)));
        }

        Ok(stats)
    }

    /// Runs selection then propagation over every selected conversation.
    pub fn run(&self, extra_filter: &str) -> MuteResult<MuteReport> {
        let started_at = Instant::now();
        info!(
            "event=mute_run module=service status=start address_match={}",
            self.matcher.mode()
        );

        let result = self.run_inner(extra_filter);
        match &result {
            Ok(report) => info!(
                "event=mute_run module=service status=ok duration_ms={} threads={} visited={} muted_added={} processed_added={}",
                started_at.elapsed().as_millis(),
                report.roots.len(),
                report.totals.visited,
                report.totals.muted_added,
                report.totals.processed_added
            ),
            Err(err) => error!(
                "event=mute_run module=service status=error duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }

    fn run_inner(&self, extra_filter: &str) -> MuteResult<MuteReport> {
        let query = self.candidate_query(extra_filter);
        let roots = self.select_candidate_roots(extra_filter)?;
        let mut totals = PropagationStats::default();
        for root in &roots {
            totals.absorb(self.propagate(*root)?);
        }
        Ok(MuteReport {
            query,
            roots,
            totals,
        })
    }

    /// Derives the addressing level of one message from its To/Cc headers.
    pub fn addressing_level(&self, id: MessageId) -> MuteResult<AddressingLevel> {
        let read = |name: &str| {
            self.store
                .header(id, name)
                .map_err(|source| MuteError::Read {
                    message: id,
                    source,
                })
        };
        let to = read("To")?;
        let cc = read("Cc")?;
        Ok(self.matcher.addressing_level(&to, &cc))
    }

    fn add_tag(&self, id: MessageId, tag: &str) -> MuteResult<()> {
        self.store
            .add_tag(id, tag)
            .map_err(|source| MuteError::TagWrite {
                message: id,
                tag: tag.to_string(),
                source,
            })
    }
}

/// Quotes a tag label when it contains characters the query tokenizer
/// would split on.
fn quote_term(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|ch| ch.is_whitespace() || matches!(ch, '(' | ')' | '"'));
    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

//! Message file import.
//!
//! # Responsibility
//! - Walk files/directories and insert parsable messages into the store.
//! - Skip (and count) unreadable, unparsable and already-stored messages.
//!
//! # Invariants
//! - Files are imported in sorted path order within each directory.
//! - Dot-entries and maildir `tmp` directories are never read.
//! - Store failures abort the import; per-file failures do not.

pub mod eml;

use crate::db::DbError;
use crate::repo::message_repo::{validate_tag, RepoError, SqliteMessageStore};
use log::{info, warn};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub use eml::parse_message;

pub type IngestResult<T> = Result<T, IngestError>;

/// Import error.
#[derive(Debug)]
pub enum IngestError {
    /// Path could not be read.
    Io { path: PathBuf, source: io::Error },
    /// Bytes are not a parsable message.
    Unparsable,
    /// Message carries no `Message-ID`.
    MissingMessageId,
    /// Store rejected an operation.
    Repo(RepoError),
}

impl Display for IngestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read `{}`: {source}", path.display()),
            Self::Unparsable => write!(f, "not a parsable message"),
            Self::MissingMessageId => write!(f, "message has no Message-ID header"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IngestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Repo(err) => Some(err),
            Self::Unparsable | Self::MissingMessageId => None,
        }
    }
}

impl From<RepoError> for IngestError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<DbError> for IngestError {
    fn from(value: DbError) -> Self {
        Self::Repo(RepoError::Db(value))
    }
}

/// One file that was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Import summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Files considered.
    pub scanned: u64,
    /// Messages inserted.
    pub imported: u64,
    /// Messages whose `Message-ID` was already stored.
    pub duplicates: u64,
    /// Files that could not be read or parsed.
    pub skipped: Vec<SkippedFile>,
}

/// Imports every message file under `paths`, applying `tags` to each newly
/// inserted message.
///
/// # Errors
/// - [`IngestError::Io`] when a top-level path cannot be read.
/// - [`IngestError::Repo`] when the store rejects a write.
pub fn import_paths(
    store: &SqliteMessageStore<'_>,
    paths: &[PathBuf],
    tags: &[String],
) -> IngestResult<IngestReport> {
    for tag in tags {
        validate_tag(tag)?;
    }

    let started_at = Instant::now();
    info!(
        "event=import module=ingest status=start paths={}",
        paths.len()
    );

    let mut files = Vec::new();
    for path in paths {
        collect_files(path, &mut files)?;
    }

    let mut report = IngestReport::default();
    for file in files {
        report.scanned += 1;
        let raw = match std::fs::read(&file) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("event=import_file module=ingest status=skipped reason=io error={err}");
                report.skipped.push(SkippedFile {
                    path: file,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        let mut message = match parse_message(&raw) {
            Ok(message) => message,
            Err(err) => {
                warn!("event=import_file module=ingest status=skipped reason=parse error={err}");
                report.skipped.push(SkippedFile {
                    path: file,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        if store.find_by_message_id(&message.message_id)?.is_some() {
            report.duplicates += 1;
            continue;
        }
        message.tags.extend(tags.iter().cloned());
        store.insert_message(&message)?;
        report.imported += 1;
    }

    info!(
        "event=import module=ingest status=ok duration_ms={} scanned={} imported={} duplicates={} skipped={}",
        started_at.elapsed().as_millis(),
        report.scanned,
        report.imported,
        report.duplicates,
        report.skipped.len()
    );
    Ok(report)
}

fn collect_files(path: &Path, files: &mut Vec<PathBuf>) -> IngestResult<()> {
    let metadata = std::fs::metadata(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if metadata.is_file() {
        files.push(path.to_path_buf());
        return Ok(());
    }

    let entries = std::fs::read_dir(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut children = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name == "tmp" {
            continue;
        }
        children.push(entry.path());
    }
    children.sort();

    for child in children {
        collect_files(&child, files)?;
    }
    Ok(())
}

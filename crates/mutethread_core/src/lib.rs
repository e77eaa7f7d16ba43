//! Core logic for mutethread.
//! Propagates a manually applied mute tag down email reply trees, stopping
//! wherever the recipient is newly addressed.

pub mod db;
pub mod display;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod repo;
pub mod search;
pub mod service;

pub use db::{open_db, open_db_in_memory, DbError, OpenMode};
pub use display::thread_view::{render_thread, MuteMarker, ThreadLine};
pub use ingest::{import_paths, parse_message, IngestError, IngestReport, IngestResult};
pub use logging::{default_log_level, init_logging, init_logging_with, logging_status, LogConfig};
pub use model::addressing::{AddressMatch, AddressMatcher, AddressingLevel};
pub use model::message::{MessageId, NewMessage};
pub use model::mute::{decide_mute, MuteTags, ParentContext};
pub use repo::message_repo::{
    MessageRecord, MessageStore, RepoError, RepoResult, SqliteMessageStore, ThreadQuery,
};
pub use search::query::{Query, QueryError};
pub use service::mute_service::{
    open_store, MuteConfig, MuteError, MuteReport, MuteResult, MuteService, PropagationStats,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//! Message store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Define the narrow store interface consumed by mute propagation.
//! - Persist messages, headers, reply links and tags in SQLite.
//! - Thread incoming messages onto existing conversations.
//!
//! # Invariants
//! - Every conversation has exactly one parentless message (its root) unless
//!   a reply arrives whose parent is still unknown; such replies start their
//!   own conversation and are adopted when the parent is inserted.
//! - A message hangs under its nearest known parent reference; inserting that
//!   parent later moves it, with its replies, under the new message.
//! - Reply links never form cycles.
//! - Tags are only added through this interface, never removed.
//! - A [`ThreadQuery`] is consumed by the search that runs it.

use crate::db::DbError;
use crate::model::message::{MessageId, NewMessage};
use crate::search::query::{compile_predicate, Query, QueryError};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

/// Error for message store operations.
#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Query text could not be parsed.
    Query(QueryError),
    /// Target message does not exist.
    NotFound(MessageId),
    /// Message with the same `Message-ID` is already stored.
    DuplicateMessage(String),
    /// Tag label is empty or whitespace.
    InvalidTag(String),
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Query(err) => write!(f, "invalid query: {err}"),
            Self::NotFound(id) => write!(f, "message not found: {id}"),
            Self::DuplicateMessage(message_id) => {
                write!(f, "message already stored: <{message_id}>")
            }
            Self::InvalidTag(tag) => write!(f, "invalid tag: `{tag}`"),
            Self::InvalidData(message) => write!(f, "invalid persisted message data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Query(err) => Some(err),
            Self::NotFound(_) => None,
            Self::DuplicateMessage(_) => None,
            Self::InvalidTag(_) => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<QueryError> for RepoError {
    fn from(value: QueryError) -> Self {
        Self::Query(value)
    }
}

/// Parsed conversation query.
///
/// Deliberately not `Clone`: a handle is spent by [`MessageStore::search_roots`]
/// so results never come from a query issued before the store was mutated.
#[derive(Debug)]
pub struct ThreadQuery {
    query: Query,
}

impl ThreadQuery {
    pub fn parse(text: &str) -> RepoResult<Self> {
        Ok(Self {
            query: Query::parse(text)?,
        })
    }

    pub fn into_query(self) -> Query {
        self.query
    }
}

/// Store interface consumed by mute selection and propagation.
pub trait MessageStore {
    /// Parses a query string into a single-use handle.
    fn query(&self, query_string: &str) -> RepoResult<ThreadQuery>;
    /// Runs `query` and returns one root per matching conversation.
    ///
    /// Each top-level conjunct must be satisfied by some message of the
    /// conversation, not necessarily the same one.
    fn search_roots(&self, query: ThreadQuery) -> RepoResult<Vec<MessageId>>;
    /// Returns the tag set of one message.
    fn tags(&self, id: MessageId) -> RepoResult<BTreeSet<String>>;
    /// Adds one tag; adding a present tag is a no-op.
    fn add_tag(&self, id: MessageId, label: &str) -> RepoResult<()>;
    /// Returns all values of header `name` joined by `", "`, or `""`.
    fn header(&self, id: MessageId, name: &str) -> RepoResult<String>;
    /// Returns direct replies in date order.
    fn replies(&self, id: MessageId) -> RepoResult<Vec<MessageId>>;
}

impl<S: MessageStore + ?Sized> MessageStore for &S {
    fn query(&self, query_string: &str) -> RepoResult<ThreadQuery> {
        (**self).query(query_string)
    }

    fn search_roots(&self, query: ThreadQuery) -> RepoResult<Vec<MessageId>> {
        (**self).search_roots(query)
    }

    fn tags(&self, id: MessageId) -> RepoResult<BTreeSet<String>> {
        (**self).tags(id)
    }

    fn add_tag(&self, id: MessageId, label: &str) -> RepoResult<()> {
        (**self).add_tag(id, label)
    }

    fn header(&self, id: MessageId, name: &str) -> RepoResult<String> {
        (**self).header(id, name)
    }

    fn replies(&self, id: MessageId) -> RepoResult<Vec<MessageId>> {
        (**self).replies(id)
    }
}

/// Read model for one stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    /// RFC 5322 `Message-ID`, without angle brackets.
    pub message_id: String,
    pub thread_id: String,
    pub parent: Option<MessageId>,
    /// Unix epoch seconds.
    pub date: i64,
}

/// SQLite-backed message store.
pub struct SqliteMessageStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMessageStore<'conn> {
    /// Constructs a store from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Inserts one message and links it into its conversation.
    ///
    /// # Errors
    /// - [`RepoError::DuplicateMessage`] when the `Message-ID` is stored.
    /// - [`RepoError::InvalidData`] when the `Message-ID` is empty.
    /// - [`RepoError::InvalidTag`] when a tag is empty or padded.
    pub fn insert_message(&self, message: &NewMessage) -> RepoResult<MessageId> {
        let message_id = message.message_id.trim();
        if message_id.is_empty() {
            return Err(RepoError::InvalidData(
                "message id cannot be empty".to_string(),
            ));
        }
        for tag in &message.tags {
            validate_tag(tag)?;
        }

        let tx = self.conn.unchecked_transaction()?;
        if find_uuid_by_message_id(&tx, message_id)?.is_some() {
            return Err(RepoError::DuplicateMessage(message_id.to_string()));
        }

        let id = Uuid::new_v4();
        let mut parent = None;
        for candidate in message.parent_candidates() {
            if let Some(found) = find_uuid_by_message_id(&tx, candidate)? {
                parent = Some(found);
                break;
            }
        }
        let thread_id = match parent {
            Some(parent_id) => load_thread_id(&tx, parent_id)?,
            None => Uuid::new_v4().to_string(),
        };
        let parent_ref = message.parent_candidates().first().map(|value| value.to_string());

        tx.execute(
            "INSERT INTO messages (
                uuid,
                message_id,
                thread_id,
                parent_uuid,
                parent_ref,
                date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                id.to_string(),
                message_id,
                thread_id.as_str(),
                parent.map(|value| value.to_string()),
                parent_ref,
                message.date,
            ],
        )?;

        for (position, (name, value)) in message.headers.iter().enumerate() {
            tx.execute(
                "INSERT INTO message_headers (message_uuid, position, name, value)
                 VALUES (?1, ?2, ?3, ?4);",
                params![id.to_string(), position as i64, name.trim(), value],
            )?;
        }

        for tag in &message.tags {
            insert_tag_link(&tx, id, tag)?;
        }

        let relinked = relink_replies(&tx, id, message_id, thread_id.as_str())?;
        tx.commit()?;

        debug!(
            "event=message_insert module=repo status=ok message_uuid={} threaded={} relinked={}",
            id,
            parent.is_some(),
            relinked
        );
        Ok(id)
    }

    /// Finds a message by its RFC 5322 `Message-ID`.
    pub fn find_by_message_id(&self, message_id: &str) -> RepoResult<Option<MessageId>> {
        find_uuid_by_message_id(self.conn, message_id.trim())
    }

    /// Loads one message read model.
    pub fn get_message(&self, id: MessageId) -> RepoResult<Option<MessageRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT uuid, message_id, thread_id, parent_uuid, date
                 FROM messages
                 WHERE uuid = ?1;",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>("uuid")?,
                        row.get::<_, String>("message_id")?,
                        row.get::<_, String>("thread_id")?,
                        row.get::<_, Option<String>>("parent_uuid")?,
                        row.get::<_, i64>("date")?,
                    ))
                },
            )
            .optional()?;

        let Some((uuid, message_id, thread_id, parent, date)) = row else {
            return Ok(None);
        };
        Ok(Some(MessageRecord {
            id: parse_uuid(&uuid)?,
            message_id,
            thread_id,
            parent: parent.as_deref().map(parse_uuid).transpose()?,
            date,
        }))
    }

    /// Runs `query` per message (the whole expression must hold for one
    /// message) and returns matches in date order.
    pub fn search_messages(&self, query: ThreadQuery) -> RepoResult<Vec<MessageId>> {
        let query = query.into_query();
        let mut binds = Vec::new();
        let predicate = compile_predicate(query.expr(), "m", &mut binds);
        let sql = format!(
            "SELECT m.uuid
             FROM messages m
             WHERE {predicate}
             ORDER BY m.date ASC, m.rowid ASC;"
        );
        collect_ids(self.conn, &sql, binds)
    }

    /// Returns the total number of stored messages.
    pub fn count_messages(&self) -> RepoResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages;", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn ensure_message_exists(&self, id: MessageId) -> RepoResult<()> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE uuid = ?1);",
            [id.to_string()],
            |row| row.get(0),
        )?;
        if exists == 1 {
            Ok(())
        } else {
            Err(RepoError::NotFound(id))
        }
    }
}

impl MessageStore for SqliteMessageStore<'_> {
    fn query(&self, query_string: &str) -> RepoResult<ThreadQuery> {
        ThreadQuery::parse(query_string)
    }

    fn search_roots(&self, query: ThreadQuery) -> RepoResult<Vec<MessageId>> {
        let query = query.into_query();
        let mut binds = Vec::new();
        let having = query
            .conjuncts()
            .into_iter()
            .map(|conjunct| {
                format!(
                    "MAX(CASE WHEN {} THEN 1 ELSE 0 END) = 1",
                    compile_predicate(conjunct, "m", &mut binds)
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!(
            "SELECT r.thread_id, r.uuid
             FROM messages r
             WHERE r.parent_uuid IS NULL
               AND r.thread_id IN (
                 SELECT m.thread_id
                 FROM messages m
                 GROUP BY m.thread_id
                 HAVING {having}
               )
             ORDER BY r.date ASC, r.rowid ASC;"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut seen_threads = HashSet::new();
        let mut roots = Vec::new();
        while let Some(row) = rows.next()? {
            let thread_id: String = row.get(0)?;
            let uuid: String = row.get(1)?;
            if seen_threads.insert(thread_id) {
                roots.push(parse_uuid(&uuid)?);
            }
        }
        Ok(roots)
    }

    fn tags(&self, id: MessageId) -> RepoResult<BTreeSet<String>> {
        self.ensure_message_exists(id)?;
        let mut stmt = self.conn.prepare(
            "SELECT t.name
             FROM message_tags mt
             INNER JOIN tags t ON t.id = mt.tag_id
             WHERE mt.message_uuid = ?1;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        let mut tags = BTreeSet::new();
        while let Some(row) = rows.next()? {
            tags.insert(row.get::<_, String>(0)?);
        }
        Ok(tags)
    }

    fn add_tag(&self, id: MessageId, label: &str) -> RepoResult<()> {
        validate_tag(label)?;
        self.ensure_message_exists(id)?;
        insert_tag_link(self.conn, id, label)
    }

    fn header(&self, id: MessageId, name: &str) -> RepoResult<String> {
        self.ensure_message_exists(id)?;
        let mut stmt = self.conn.prepare(
            "SELECT value
             FROM message_headers
             WHERE message_uuid = ?1
               AND name = ?2
             ORDER BY position ASC;",
        )?;
        let mut rows = stmt.query(params![id.to_string(), name])?;
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            values.push(row.get::<_, String>(0)?);
        }
        Ok(values.join(", "))
    }

    fn replies(&self, id: MessageId) -> RepoResult<Vec<MessageId>> {
        self.ensure_message_exists(id)?;
        collect_ids(
            self.conn,
            "SELECT uuid
             FROM messages
             WHERE parent_uuid = ?
             ORDER BY date ASC, rowid ASC;",
            vec![Value::Text(id.to_string())],
        )
    }
}

/// Rejects empty tag labels and labels with surrounding whitespace.
///
/// Labels are stored verbatim.
pub fn validate_tag(tag: &str) -> RepoResult<()> {
    if tag.is_empty() || tag.trim() != tag {
        return Err(RepoError::InvalidTag(tag.to_string()));
    }
    Ok(())
}

fn insert_tag_link(conn: &Connection, id: MessageId, tag: &str) -> RepoResult<()> {
    conn.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1);", [tag])?;
    conn.execute(
        "INSERT OR IGNORE INTO message_tags (message_uuid, tag_id)
         SELECT ?1, id
         FROM tags
         WHERE name = ?2;",
        params![id.to_string(), tag],
    )?;
    Ok(())
}

/// Moves every message whose nearest parent reference is `message_id`
/// under the newly inserted `id`.
///
/// Covers replies stored before their parent existed and replies threaded
/// under a more distant `References` ancestor. Ancestors of `id` are left
/// alone so no cycle forms. The moved subtree joins `thread_id`.
fn relink_replies(
    conn: &Connection,
    id: MessageId,
    message_id: &str,
    thread_id: &str,
) -> RepoResult<usize> {
    let mut stmt = conn.prepare(
        "SELECT uuid
         FROM messages
         WHERE parent_ref = ?1
           AND uuid <> ?2
           AND (parent_uuid IS NULL OR parent_uuid <> ?2);",
    )?;
    let mut rows = stmt.query(params![message_id, id.to_string()])?;
    let mut replies = Vec::new();
    while let Some(row) = rows.next()? {
        replies.push(row.get::<_, String>(0)?);
    }

    let mut moved = 0;
    for reply in replies {
        let is_ancestor: bool = conn.query_row(
            "WITH RECURSIVE ancestors(uuid) AS (
                SELECT parent_uuid FROM messages WHERE uuid = ?1
                UNION
                SELECT m.parent_uuid
                FROM messages m
                INNER JOIN ancestors a ON m.uuid = a.uuid
            )
            SELECT EXISTS (SELECT 1 FROM ancestors WHERE uuid = ?2);",
            params![id.to_string(), reply],
            |row| row.get(0),
        )?;
        if is_ancestor {
            continue;
        }
        conn.execute(
            "UPDATE messages SET parent_uuid = ?1 WHERE uuid = ?2;",
            params![id.to_string(), reply],
        )?;
        conn.execute(
            "WITH RECURSIVE subtree(uuid) AS (
                SELECT ?1
                UNION
                SELECT m.uuid
                FROM messages m
                INNER JOIN subtree s ON m.parent_uuid = s.uuid
            )
            UPDATE messages SET thread_id = ?2
            WHERE uuid IN (SELECT uuid FROM subtree);",
            params![reply, thread_id],
        )?;
        moved += 1;
    }
    Ok(moved)
}

fn find_uuid_by_message_id(conn: &Connection, message_id: &str) -> RepoResult<Option<MessageId>> {
    let uuid = conn
        .query_row(
            "SELECT uuid FROM messages WHERE message_id = ?1;",
            [message_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    uuid.as_deref().map(parse_uuid).transpose()
}

fn load_thread_id(conn: &Connection, id: MessageId) -> RepoResult<String> {
    conn.query_row(
        "SELECT thread_id FROM messages WHERE uuid = ?1;",
        [id.to_string()],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(RepoError::NotFound(id))
}

fn collect_ids(conn: &Connection, sql: &str, binds: Vec<Value>) -> RepoResult<Vec<MessageId>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(binds))?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        let uuid: String = row.get(0)?;
        ids.push(parse_uuid(&uuid)?);
    }
    Ok(ids)
}

fn parse_uuid(value: &str) -> RepoResult<MessageId> {
    Uuid::parse_str(value).map_err(|_| {
        RepoError::InvalidData(format!("invalid uuid value `{value}` in messages.uuid"))
    })
}

fn ensure_store_connection_ready(conn: &Connection) -> RepoResult<()> {
    for table in ["messages", "message_headers", "tags", "message_tags"] {
        if !table_exists(conn, table)? {
            return Err(RepoError::InvalidData(format!(
                "message store requires table `{table}`; open the database through `open_db`"
            )));
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

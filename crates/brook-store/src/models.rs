//! Domain model structs persisted by the store.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the service layer.  Free-form attribute blobs (`public`,
//! `private`, message `head`/`content`) are kept as `serde_json::Value` and
//! stored as JSON text.

use brook_types::{AccessMode, DelRange, Uid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// How an entity is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Stamp the deletion timestamp; the row remains.
    Soft,
    /// Physically remove the row and its dependents.
    Hard,
}

/// Whether reads see soft-deleted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Default: soft-deleted rows are filtered out.
    ActiveOnly,
    /// Soft-deleted rows are returned alongside active ones.
    KeepDeleted,
}

impl Visibility {
    pub fn keep_deleted(&self) -> bool {
        matches!(self, Visibility::KeepDeleted)
    }
}

/// Default access modes granted to authenticated and anonymous subscribers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DefaultAccess {
    pub auth: AccessMode,
    pub anon: AccessMode,
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub uid: Uid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub state: i32,
    pub access: DefaultAccess,
    pub last_seen: Option<DateTime<Utc>>,
    pub user_agent: String,
    pub public: Option<Value>,
    pub tags: Vec<String>,
}

/// A conversation topic.  The name is the primary key; for P2P topics it is
/// derived from the two participants' identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Topic {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub touched_at: Option<DateTime<Utc>>,
    pub owner: Uid,
    pub access: DefaultAccess,
    /// Highest message sequence id issued in the topic.  Only increases.
    pub seq_id: u32,
    /// Highest deletion-log event id.  Only increases.
    pub del_id: u32,
    pub public: Option<Value>,
    pub tags: Vec<String>,
}

/// A user's subscription to a topic.
///
/// List operations enrich the bare subscription row with values joined from
/// the topic or, for P2P topics, from the counterpart user: `public`,
/// `seq_id`, `touched_at`, `with_user` and `default_access` are `None`/zero
/// unless the producing query filled them in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub user: Uid,
    pub topic: String,
    pub del_id: u32,
    pub recv_seq_id: u32,
    pub read_seq_id: u32,
    pub mode_want: AccessMode,
    pub mode_given: AccessMode,
    pub private: Option<Value>,

    /// Last presence in this topic, with the reporting agent.  P2P contact
    /// listings override both with the counterpart user's values.
    pub last_seen: Option<DateTime<Utc>>,
    pub user_agent: Option<String>,

    // Joined values.
    pub public: Option<Value>,
    pub seq_id: u32,
    pub touched_at: Option<DateTime<Utc>>,
    /// For P2P entries: the other party.
    pub with_user: Option<Uid>,
    pub default_access: Option<DefaultAccess>,
}

/// A single message in a topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Storage key assigned on save.
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Deletion-log event id if the message was hard-deleted, 0 otherwise.
    pub del_id: u32,
    /// Topic-scoped monotonic sequence id.
    pub seq_id: u32,
    pub topic: String,
    pub from: Uid,
    pub head: Option<Value>,
    pub content: Option<Value>,
}

/// One logical deletion event: all dellog rows sharing a `del_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelEvent {
    pub topic: String,
    pub del_id: u32,
    /// `None` when deleted for everyone.
    pub deleted_for: Option<Uid>,
    pub ranges: Vec<DelRange>,
}

/// A (method, value) verification record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub user: Uid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub method: String,
    pub value: String,
    pub resp: Option<String>,
    pub done: bool,
    pub retries: u32,
}

/// A push-notification device registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub device_id: String,
    pub platform: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub lang: Option<String>,
}

/// Status of an upload in progress.
pub const UPLOAD_STARTED: i32 = 0;
pub const UPLOAD_COMPLETED: i32 = 1;
pub const UPLOAD_FAILED: i32 = -1;

/// Metadata for an uploaded blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileUpload {
    pub id: Uid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user: Uid,
    pub status: i32,
    pub mime_type: String,
    pub size: i64,
    pub location: String,
}

/// A user or topic returned by tag search, ranked by match count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FoundEntity {
    /// Opaque user id or topic name.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub access: DefaultAccess,
    pub public: Option<Value>,
    /// The subset of the queried tags this entity carries.
    pub matched_tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Query options
// ---------------------------------------------------------------------------

/// Options common to list queries.
#[derive(Debug, Clone, Default)]
pub struct ListOpts {
    /// Restrict to one topic.
    pub topic: Option<String>,
    /// Restrict to one user.
    pub user: Option<Uid>,
    /// Lower bound (inclusive) on seq id / del id.
    pub since: Option<u32>,
    /// Upper bound (exclusive) on seq id / del id.
    pub before: Option<u32>,
    /// Maximum number of results; clamped to the configured maximum.
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

pub(crate) fn ts_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn opt_ts_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
    })
    .transpose()
}

/// NULL-able JSON column.
pub(crate) fn json_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        serde_json::from_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

/// Tags column: NULL or a JSON array of strings.
pub(crate) fn tags_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        None => Ok(Vec::new()),
        Some(s) => serde_json::from_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

/// Access-mode column stored as permission letters.
pub(crate) fn mode_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<AccessMode> {
    let s: Option<String> = row.get(idx)?;
    Ok(s.map(|s| AccessMode::parse(&s)).unwrap_or_default())
}

/// Default-access column stored as JSON.
pub(crate) fn access_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DefaultAccess> {
    let s: Option<String> = row.get(idx)?;
    match s {
        None => Ok(DefaultAccess::default()),
        Some(s) => serde_json::from_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

/// Accumulates an explicit SET clause for partial updates.  Each updatable
/// field is named statically by the per-entity update structs; there is no
/// generic map-driven dispatch.
pub(crate) struct SetBuilder {
    cols: Vec<&'static str>,
    args: Vec<rusqlite::types::Value>,
}

impl SetBuilder {
    pub(crate) fn new() -> SetBuilder {
        SetBuilder { cols: Vec::new(), args: Vec::new() }
    }

    pub(crate) fn push(&mut self, col: &'static str, val: rusqlite::types::Value) {
        self.cols.push(col);
        self.args.push(val);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    /// Render `col1=?1,col2=?2,…` and hand back the positional arguments.
    /// Further placeholders in the enclosing statement continue from
    /// `args.len() + 1`.
    pub(crate) fn finish(self) -> (String, Vec<rusqlite::types::Value>) {
        let clause = self
            .cols
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{}=?{}", col, i + 1))
            .collect::<Vec<_>>()
            .join(",");
        (clause, self.args)
    }
}

pub(crate) fn ts_value(ts: &DateTime<Utc>) -> rusqlite::types::Value {
    rusqlite::types::Value::Text(ts.to_rfc3339())
}

pub(crate) fn opt_text_value(s: Option<String>) -> rusqlite::types::Value {
    match s {
        Some(s) => rusqlite::types::Value::Text(s),
        None => rusqlite::types::Value::Null,
    }
}

/// Serialize an optional JSON value for storage; `None` stores SQL NULL.
pub(crate) fn json_text(v: &Option<Value>) -> Option<String> {
    v.as_ref().map(|v| v.to_string())
}

/// Serialize a tag list for the denormalized column.
pub(crate) fn tags_text(tags: &[String]) -> Option<String> {
    if tags.is_empty() {
        None
    } else {
        serde_json::to_string(tags).ok()
    }
}

/// Serialize default access for storage.
pub(crate) fn access_text(access: &DefaultAccess) -> Option<String> {
    serde_json::to_string(access).ok()
}

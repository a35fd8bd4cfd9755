//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. It also owns the message
//! clock, so timestamps handed out by one handle never go backwards.

use std::cell::Cell;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use tradepost_shared::{UserKind, UserRef};

use crate::error::Result;
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
    /// Last timestamp assigned to a write.
    last_timestamp: Cell<Option<DateTime<Utc>>>,
}

impl Database {
    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open a private in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        let last: Option<String> = conn
            .query_row("SELECT MAX(timestamp) FROM messages", [], |row| row.get(0))
            .optional()?
            .flatten();
        let last_timestamp = last
            .as_deref()
            .map(|s| parse_timestamp(0, s))
            .transpose()?;

        Ok(Self {
            conn,
            last_timestamp: Cell::new(last_timestamp),
        })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    /// Next write timestamp: the current time at microsecond precision, or
    /// one microsecond past the previous timestamp if the clock has not
    /// moved on (or went backwards).
    pub(crate) fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let ts = match self.last_timestamp.get() {
            Some(last) if last >= now => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp.set(Some(ts));
        ts
    }
}

// ---------------------------------------------------------------------------
// Column codecs shared by the CRUD modules
// ---------------------------------------------------------------------------

/// Fixed-width RFC 3339 so that lexical order matches chronological order.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_uuid(idx: usize, s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_kind(idx: usize, s: &str) -> rusqlite::Result<UserKind> {
    s.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a `(kind, id)` column pair starting at `idx`.
pub(crate) fn read_user_ref(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<UserRef> {
    let kind: String = row.get(idx)?;
    let id: String = row.get(idx + 1)?;
    Ok(UserRef::new(parse_kind(idx, &kind)?, parse_uuid(idx + 1, &id)?))
}

/// Read a nullable `(kind, id)` column pair starting at `idx`.
pub(crate) fn read_optional_user_ref(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<UserRef>> {
    let kind: Option<String> = row.get(idx)?;
    let id: Option<String> = row.get(idx + 1)?;
    match (kind, id) {
        (Some(kind), Some(id)) => Ok(Some(UserRef::new(
            parse_kind(idx, &kind)?,
            parse_uuid(idx + 1, &id)?,
        ))),
        _ => Ok(None),
    }
}

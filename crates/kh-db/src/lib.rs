//! Storage layer for keyheat.
//!
//! Every key transition read from the keyboard is appended to a `SQLite`
//! table. The log is the only persistent state: trackers rebuild their
//! aggregates from it on every start (see [`kh_core::spawn_bootstrap`]).
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Use one `Database` per thread. File databases are opened in WAL mode, so a
//! connection replaying history does not block the connection appending live
//! events.
//!
//! # Schema
//!
//! ```sql
//! keypresses(row INTEGER, col INTEGER, position INTEGER, pressed INTEGER, ts TEXT)
//! ```
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond precision
//! (e.g., `2024-01-15T10:30:00.000Z`). Rows written by older tools as
//! `YYYY-MM-DD HH:MM:SS[.fff]` (UTC) are accepted on read. The two forms do
//! not sort together as text, so reads order by `julianday(ts)`.

use std::ops::ControlFlow;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use kh_core::{HistorySource, KeyEvent, KeyPosition, KeyTransition, ValidationError};
use rusqlite::{Connection, Row, params};
use serde::Serialize;
use thiserror::Error;

/// How long a connection waits on a lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp in keypress row {rowid}: {timestamp}")]
    TimestampParse { rowid: i64, timestamp: String },
    /// A stored position is outside the tracked key range.
    #[error("invalid position in keypress row {rowid}: {source}")]
    InvalidPosition {
        rowid: i64,
        #[source]
        source: ValidationError,
    },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// A stored key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeypressRecord {
    pub event: KeyEvent,
    pub timestamp: DateTime<Utc>,
}

impl KeypressRecord {
    pub const fn transition(&self) -> KeyTransition {
        KeyTransition::new(self.event.position, self.event.pressed, self.timestamp)
    }
}

/// Number of completed presses (releases) per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyCount {
    pub row: i64,
    pub col: i64,
    pub position: i64,
    pub count: i64,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS keypresses (
                row INTEGER NOT NULL,
                col INTEGER NOT NULL,
                position INTEGER NOT NULL,
                pressed INTEGER NOT NULL,
                ts TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_keypresses_ts ON keypresses(ts);
            ",
        )?;
        Ok(())
    }

    /// Appends a key event observed just now.
    pub fn insert_keypress(&mut self, event: &KeyEvent) -> Result<(), DbError> {
        self.insert_keypress_at(event, Utc::now())
    }

    /// Appends a key event observed at `timestamp`.
    pub fn insert_keypress_at(
        &mut self,
        event: &KeyEvent,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO keypresses (row, col, position, pressed, ts) VALUES (?, ?, ?, ?, ?)",
            params![
                event.row,
                event.col,
                i64::from(event.position),
                event.pressed,
                format_timestamp(timestamp),
            ],
        )?;
        Ok(())
    }

    /// Appends a batch of records in one transaction.
    pub fn insert_keypresses(&mut self, records: &[KeypressRecord]) -> Result<usize, DbError> {
        if records.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO keypresses (row, col, position, pressed, ts) VALUES (?, ?, ?, ?, ?)",
            )?;
            for record in records {
                inserted += stmt.execute(params![
                    record.event.row,
                    record.event.col,
                    i64::from(record.event.position),
                    record.event.pressed,
                    format_timestamp(record.timestamp),
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Streams every stored record in ascending timestamp order.
    ///
    /// Rows sharing a timestamp come out in insertion order. Stops early when
    /// `visit` returns [`ControlFlow::Break`]. Returns the number of records visited.
    pub fn for_each_keypress(
        &self,
        mut visit: impl FnMut(KeypressRecord) -> ControlFlow<()>,
    ) -> Result<u64, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT rowid, row, col, position, pressed, ts
            FROM keypresses
            ORDER BY julianday(ts) ASC, rowid ASC
            ",
        )?;
        let mut rows = stmt.query([])?;
        let mut visited = 0;
        while let Some(row) = rows.next()? {
            let record = record_from_row(row)?;
            visited += 1;
            if visit(record).is_break() {
                break;
            }
        }
        Ok(visited)
    }

    /// Lists all stored records in ascending timestamp order.
    pub fn list_keypresses(&self) -> Result<Vec<KeypressRecord>, DbError> {
        let mut records = Vec::new();
        self.for_each_keypress(|record| {
            records.push(record);
            ControlFlow::Continue(())
        })?;
        Ok(records)
    }

    /// Counts releases per key, ordered by row then position.
    pub fn key_counts(&self) -> Result<Vec<KeyCount>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT row, col, position, COUNT(*) AS cnt
            FROM keypresses
            WHERE pressed = 0
            GROUP BY row, col, position
            ORDER BY row ASC, position ASC, col ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(KeyCount {
                row: row.get(0)?,
                col: row.get(1)?,
                position: row.get(2)?,
                count: row.get(3)?,
            })
        })?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    /// Total number of stored transitions.
    pub fn keypress_count(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM keypresses", [], |row| row.get(0))?)
    }

    /// Copies every record of `other` into this database.
    pub fn merge_from(&mut self, other: &Self) -> Result<usize, DbError> {
        let records = other.list_keypresses()?;
        let inserted = self.insert_keypresses(&records)?;
        tracing::debug!(inserted, "merged keypress log");
        Ok(inserted)
    }
}

/// Replays the log through a dedicated connection.
impl HistorySource for Database {
    type Error = DbError;

    fn replay(
        self,
        sink: &mut dyn FnMut(KeyTransition) -> ControlFlow<()>,
    ) -> Result<(), Self::Error> {
        self.for_each_keypress(|record| sink(record.transition()))?;
        Ok(())
    }
}

fn record_from_row(row: &Row<'_>) -> Result<KeypressRecord, DbError> {
    let rowid: i64 = row.get(0)?;
    let position: i64 = row.get(3)?;
    let ts: String = row.get(5)?;

    let position = KeyPosition::new(position)
        .map_err(|source| DbError::InvalidPosition { rowid, source })?;
    let timestamp = parse_timestamp(&ts).ok_or(DbError::TimestampParse {
        rowid,
        timestamp: ts,
    })?;

    Ok(KeypressRecord {
        event: KeyEvent {
            row: row.get(1)?,
            col: row.get(2)?,
            position,
            pressed: row.get(4)?,
        },
        timestamp,
    })
}

fn parse_timestamp(timestamp: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

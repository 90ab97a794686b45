//! SQLite-backed durable log. Survives daemon restarts and can be shared by
//! several processes (the daemon and `kanband publish`) through WAL mode.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};

use super::{EventLog, LogError, LogRecord};

const BUSY_TIMEOUT: Duration = Duration::from_millis(500);

pub struct SqliteLog {
    channel: String,
    conn: Mutex<Connection>,
}

impl SqliteLog {
    /// Open (or create) a log database at the given filesystem path and run migrations.
    pub fn open(path: &Path, channel: impl Into<String>) -> Result<Self, LogError> {
        let conn = Connection::open(path).map_err(classify)?;
        Self::init(conn, channel.into())
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory(channel: impl Into<String>) -> Result<Self, LogError> {
        let conn = Connection::open_in_memory().map_err(classify)?;
        Self::init(conn, channel.into())
    }

    fn init(conn: Connection, channel: String) -> Result<Self, LogError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // Returns the resulting mode as a row, so it cannot go through execute.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        let log = Self {
            channel,
            conn: Mutex::new(conn),
        };
        log.migrate()?;
        Ok(log)
    }

    /// Create the schema if it does not already exist.
    fn migrate(&self) -> Result<(), LogError> {
        self.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                channel     TEXT NOT NULL,
                payload     BLOB NOT NULL,
                appended_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS events_channel_seq ON events (channel, seq);
            CREATE TABLE IF NOT EXISTS consumer_offsets (
                channel     TEXT NOT NULL,
                group_id    TEXT NOT NULL,
                next_offset INTEGER NOT NULL,
                committed_at TEXT NOT NULL,
                PRIMARY KEY (channel, group_id)
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Busy/locked/unopenable databases are transient; everything else is a
/// storage fault.
fn classify(err: rusqlite::Error) -> LogError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen) => {
            LogError::Unavailable(err.to_string())
        }
        _ => LogError::Storage(err),
    }
}

fn to_sql_offset(offset: u64) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

impl EventLog for SqliteLog {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn append(&self, payload: &[u8]) -> Result<u64, LogError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO events (channel, payload, appended_at) VALUES (?1, ?2, ?3)",
            params![self.channel, payload, Utc::now().to_rfc3339()],
        )
        .map_err(classify)?;
        Ok(conn.last_insert_rowid() as u64)
    }

    fn fetch(&self, from: u64, max: usize) -> Result<Vec<LogRecord>, LogError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT seq, payload FROM events
                 WHERE channel = ?1 AND seq >= ?2
                 ORDER BY seq
                 LIMIT ?3",
            )
            .map_err(classify)?;
        let limit = i64::try_from(max).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![self.channel, to_sql_offset(from), limit], |row| {
                let seq: i64 = row.get(0)?;
                let payload: Vec<u8> = row.get(1)?;
                Ok(LogRecord {
                    offset: seq as u64,
                    payload,
                })
            })
            .map_err(classify)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(classify)?);
        }
        Ok(result)
    }

    fn end_offset(&self) -> Result<u64, LogError> {
        let next: i64 = self
            .lock()
            .query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM events", [], |row| {
                row.get(0)
            })
            .map_err(classify)?;
        Ok(next as u64)
    }

    fn committed_offset(&self, group: &str) -> Result<Option<u64>, LogError> {
        let next: Option<i64> = self
            .lock()
            .query_row(
                "SELECT next_offset FROM consumer_offsets WHERE channel = ?1 AND group_id = ?2",
                params![self.channel, group],
                |row| row.get(0),
            )
            .optional()
            .map_err(classify)?;
        Ok(next.map(|n| n as u64))
    }

    fn commit(&self, group: &str, next_offset: u64) -> Result<(), LogError> {
        self.lock()
            .execute(
                "INSERT INTO consumer_offsets (channel, group_id, next_offset, committed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (channel, group_id)
                 DO UPDATE SET next_offset = excluded.next_offset,
                               committed_at = excluded.committed_at",
                params![
                    self.channel,
                    group,
                    to_sql_offset(next_offset),
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(classify)?;
        Ok(())
    }

    fn probe(&self) -> Result<(), LogError> {
        self.lock()
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(classify)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

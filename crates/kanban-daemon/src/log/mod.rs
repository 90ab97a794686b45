//! Durable event log abstraction.
//!
//! The log is a single named channel of opaque payloads with monotonically
//! increasing offsets. Consumers read as a named group and commit the next
//! offset they want to see. Delivery is at-least-once: a consumer that dies
//! between processing and committing re-reads the uncommitted tail.
//!
//! Defined as a synchronous trait. Async callers run it on
//! `tokio::task::spawn_blocking`.

mod memory;
mod sqlite;

pub use memory::MemoryLog;
pub use sqlite::SqliteLog;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

/// Thread-safe handle to the log shared by the reader, writer and monitor.
pub type SharedLog = Arc<dyn EventLog>;

/// One payload as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub offset: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum LogError {
    /// Transient: the log cannot be reached right now. Callers retry later.
    #[error("log unavailable: {0}")]
    Unavailable(String),

    #[error("log storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("log io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("log task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl LogError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub trait EventLog: Send + Sync + 'static {
    /// Name of the channel this handle reads and appends to.
    fn channel(&self) -> &str;

    /// Append one payload and return its offset.
    fn append(&self, payload: &[u8]) -> Result<u64, LogError>;

    /// Up to `max` records with `offset >= from`, in offset order.
    fn fetch(&self, from: u64, max: usize) -> Result<Vec<LogRecord>, LogError>;

    /// Offset the next appended record will be at least.
    fn end_offset(&self) -> Result<u64, LogError>;

    /// Next offset committed by `group`, if it ever committed.
    fn committed_offset(&self, group: &str) -> Result<Option<u64>, LogError>;

    /// Record that `group` has processed everything before `next_offset`.
    fn commit(&self, group: &str, next_offset: u64) -> Result<(), LogError>;

    /// Cheap reachability check used by the liveness monitor.
    fn probe(&self) -> Result<(), LogError>;
}

/// Where a consumer group starts reading when the reader boots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Replay the whole channel. Rebuilds the projection from scratch.
    #[default]
    Earliest,
    /// Only records appended after startup.
    Latest,
    /// Resume from the group's committed offset, else from the beginning.
    Committed,
}

impl StartPosition {
    /// Resolve to a concrete offset against `log`.
    pub fn resolve(self, log: &dyn EventLog, group: &str) -> Result<u64, LogError> {
        match self {
            Self::Earliest => Ok(0),
            Self::Latest => log.end_offset(),
            Self::Committed => Ok(log.committed_offset(group)?.unwrap_or(0)),
        }
    }
}

impl fmt::Display for StartPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
            Self::Committed => "committed",
        })
    }
}

impl FromStr for StartPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            "committed" => Ok(Self::Committed),
            other => Err(format!(
                "unknown start position `{other}` (expected earliest, latest or committed)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_position_parses_and_displays() {
        for pos in [
            StartPosition::Earliest,
            StartPosition::Latest,
            StartPosition::Committed,
        ] {
            assert_eq!(pos.to_string().parse::<StartPosition>(), Ok(pos));
        }
        assert!("newest".parse::<StartPosition>().is_err());
    }

    #[test]
    fn start_position_resolves_against_log() {
        let log = MemoryLog::new("t");
        log.append(b"a").unwrap();
        log.append(b"b").unwrap();

        assert_eq!(StartPosition::Earliest.resolve(&log, "g").unwrap(), 0);
        assert_eq!(StartPosition::Latest.resolve(&log, "g").unwrap(), 2);
        assert_eq!(StartPosition::Committed.resolve(&log, "g").unwrap(), 0);

        log.commit("g", 1).unwrap();
        assert_eq!(StartPosition::Committed.resolve(&log, "g").unwrap(), 1);
    }

    #[test]
    fn only_unavailable_is_transient() {
        assert!(LogError::Unavailable("down".into()).is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(!LogError::from(io).is_transient());
    }
}

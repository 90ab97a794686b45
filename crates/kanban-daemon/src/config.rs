//! Daemon configuration, independent of how it was parsed.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use kanban_core::types::DEFAULT_COLUMNS;

use crate::hub::DEFAULT_QUEUE_CAPACITY;
use crate::log::StartPosition;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8000";
pub const DEFAULT_CHANNEL: &str = "ordersmanagement";
pub const DEFAULT_GROUP: &str = "kanban-group";
pub const DEFAULT_LOG_PATH: &str = "kanban-log.sqlite3";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_BATCH_SIZE: usize = 256;
pub const DEFAULT_HEALTH_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogBackend {
    #[default]
    Sqlite,
    Memory,
}

impl fmt::Display for LogBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        })
    }
}

impl FromStr for LogBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!(
                "unknown log backend `{other}` (expected sqlite or memory)"
            )),
        }
    }
}

/// Where the board's bootstrap items come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SeedSource {
    /// The built-in two-order seed.
    #[default]
    Builtin,
    /// Start empty.
    None,
    /// A board JSON file (`{"order": [...], ...}`).
    File(PathBuf),
}

/// How the durable log is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub backend: LogBackend,
    pub path: PathBuf,
    pub channel: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            backend: LogBackend::default(),
            path: PathBuf::from(DEFAULT_LOG_PATH),
            channel: DEFAULT_CHANNEL.to_string(),
        }
    }
}

/// Board shape and bootstrap content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    /// Column names in display order; the first is the default column.
    pub columns: Vec<String>,
    pub seed: SeedSource,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            columns: DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            seed: SeedSource::default(),
        }
    }
}

/// Log reader tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    pub group: String,
    pub start_from: StartPosition,
    pub poll_interval: Duration,
    pub batch_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
            start_from: StartPosition::default(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Liveness monitor tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    pub interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_HEALTH_INTERVAL_MS),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
        }
    }
}

/// Everything `run_daemon` needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub listen: SocketAddr,
    pub log: LogConfig,
    pub board: BoardConfig,
    pub reader: ReaderOptions,
    pub monitor: MonitorOptions,
    pub queue_capacity: usize,
    pub max_connections: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8000)),
            log: LogConfig::default(),
            board: BoardConfig::default(),
            reader: ReaderOptions::default(),
            monitor: MonitorOptions::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

//! CLI definition using clap derive.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use kanban_daemon::config::{
    BoardConfig, DEFAULT_BATCH_SIZE, DEFAULT_CHANNEL, DEFAULT_GROUP, DEFAULT_HEALTH_INTERVAL_MS,
    DEFAULT_LISTEN, DEFAULT_LOG_PATH, DEFAULT_MAX_CONNECTIONS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_PROBE_TIMEOUT_MS, DaemonConfig, LogBackend, LogConfig, MonitorOptions, ReaderOptions,
    SeedSource,
};
use kanban_daemon::hub::DEFAULT_QUEUE_CAPACITY;
use kanban_daemon::log::StartPosition;

#[derive(Parser)]
#[command(name = "kanband", about = "Event-sourced kanban board synchronizer")]
pub struct Cli {
    #[command(flatten)]
    pub log: LogOpts,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon (log reader, liveness monitor, WebSocket server)
    Serve(ServeOpts),
    /// Validate one JSON command and append it to the log
    Publish {
        /// Raw command, e.g. '{"type":"delete_card","card_id":"init-1"}'
        json: String,
    },
    /// Rebuild the board from seed plus the whole log and print it as JSON
    Replay(ReplayOpts),
}

#[derive(Args, Clone)]
pub struct LogOpts {
    /// Log backend
    #[arg(long, env = "KANBAN_LOG_BACKEND", default_value = "sqlite", global = true)]
    pub log_backend: LogBackend,

    /// SQLite log file
    #[arg(long, env = "KANBAN_LOG_PATH", default_value = DEFAULT_LOG_PATH, global = true)]
    pub log_path: PathBuf,

    /// Log channel name
    #[arg(long, env = "KANBAN_CHANNEL", default_value = DEFAULT_CHANNEL, global = true)]
    pub channel: String,
}

impl LogOpts {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            backend: self.log_backend,
            path: self.log_path.clone(),
            channel: self.channel.clone(),
        }
    }
}

#[derive(Args, Clone)]
pub struct BoardOpts {
    /// Column names in display order; the first receives new cards
    #[arg(
        long,
        env = "KANBAN_COLUMNS",
        value_delimiter = ',',
        default_value = "order,invoice,analytics"
    )]
    pub columns: Vec<String>,

    /// Start from an empty board instead of the built-in seed
    #[arg(long, env = "KANBAN_NO_SEED", conflicts_with = "seed_file")]
    pub no_seed: bool,

    /// Board JSON to seed from instead of the built-in seed
    #[arg(long, env = "KANBAN_SEED_FILE")]
    pub seed_file: Option<PathBuf>,
}

impl BoardOpts {
    pub fn to_config(&self) -> BoardConfig {
        let seed = match (&self.seed_file, self.no_seed) {
            (Some(path), _) => SeedSource::File(path.clone()),
            (None, true) => SeedSource::None,
            (None, false) => SeedSource::Builtin,
        };
        BoardConfig {
            columns: self.columns.clone(),
            seed,
        }
    }
}

#[derive(Args, Clone)]
pub struct ServeOpts {
    /// Address the WebSocket server listens on
    #[arg(long, env = "KANBAN_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Consumer group the log reader commits offsets for
    #[arg(long, env = "KANBAN_GROUP", default_value = DEFAULT_GROUP)]
    pub group: String,

    /// Where the reader starts: earliest, latest or committed
    #[arg(long, env = "KANBAN_START_FROM", default_value = "earliest")]
    pub start_from: StartPosition,

    /// Log poll interval in milliseconds
    #[arg(long, env = "KANBAN_POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Maximum records fetched per poll
    #[arg(long, env = "KANBAN_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Health broadcast interval in milliseconds
    #[arg(long, env = "KANBAN_HEALTH_INTERVAL_MS", default_value_t = DEFAULT_HEALTH_INTERVAL_MS)]
    pub health_interval_ms: u64,

    /// Timeout for one liveness probe in milliseconds
    #[arg(long, env = "KANBAN_PROBE_TIMEOUT_MS", default_value_t = DEFAULT_PROBE_TIMEOUT_MS)]
    pub probe_timeout_ms: u64,

    /// Per-session outbound queue depth
    #[arg(long, env = "KANBAN_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Maximum concurrent WebSocket connections
    #[arg(long, env = "KANBAN_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    #[command(flatten)]
    pub board: BoardOpts,
}

impl Default for ServeOpts {
    fn default() -> Self {
        let defaults = DaemonConfig::default();
        Self {
            listen: defaults.listen,
            group: defaults.reader.group,
            start_from: defaults.reader.start_from,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            health_interval_ms: DEFAULT_HEALTH_INTERVAL_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            board: BoardOpts {
                columns: defaults.board.columns,
                no_seed: false,
                seed_file: None,
            },
        }
    }
}

impl ServeOpts {
    pub fn to_config(&self, log: &LogOpts) -> DaemonConfig {
        DaemonConfig {
            listen: self.listen,
            log: log.to_config(),
            board: self.board.to_config(),
            reader: ReaderOptions {
                group: self.group.clone(),
                start_from: self.start_from,
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                batch_size: self.batch_size,
            },
            monitor: MonitorOptions {
                interval: Duration::from_millis(self.health_interval_ms),
                probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            },
            queue_capacity: self.queue_capacity,
            max_connections: self.max_connections,
        }
    }
}

#[derive(Args, Clone)]
pub struct ReplayOpts {
    /// Records fetched per batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Print compact JSON instead of pretty-printed
    #[arg(long)]
    pub compact: bool,

    #[command(flatten)]
    pub board: BoardOpts,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("kanband").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn no_subcommand_means_serve_with_defaults() {
        let cli = parse(&[]);
        assert!(cli.command.is_none());
        let config = ServeOpts::default().to_config(&cli.log);
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn serve_flags_map_into_config() {
        let cli = parse(&[
            "serve",
            "--listen",
            "0.0.0.0:9000",
            "--log-backend",
            "memory",
            "--start-from",
            "committed",
            "--poll-interval-ms",
            "25",
            "--columns",
            "todo,doing,done",
            "--no-seed",
        ]);
        let Some(Command::Serve(opts)) = cli.command else {
            panic!("expected serve");
        };
        let config = opts.to_config(&cli.log);
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.log.backend, LogBackend::Memory);
        assert_eq!(config.reader.start_from, StartPosition::Committed);
        assert_eq!(config.reader.poll_interval, Duration::from_millis(25));
        assert_eq!(config.board.columns, vec!["todo", "doing", "done"]);
        assert_eq!(config.board.seed, SeedSource::None);
    }

    #[test]
    fn serve_defaults_match_config_defaults() {
        let cli = parse(&["serve"]);
        let Some(Command::Serve(opts)) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(opts.to_config(&cli.log), DaemonConfig::default());
    }

    #[test]
    fn seed_file_and_no_seed_conflict() {
        let result = Cli::try_parse_from([
            "kanband",
            "serve",
            "--no-seed",
            "--seed-file",
            "board.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn publish_takes_raw_json() {
        let cli = parse(&[
            "--log-path",
            "/tmp/k.sqlite3",
            "publish",
            r#"{"type":"delete_card","card_id":"x"}"#,
        ]);
        let Some(Command::Publish { json }) = cli.command else {
            panic!("expected publish");
        };
        assert!(json.contains("delete_card"));
        assert_eq!(cli.log.to_config().path, PathBuf::from("/tmp/k.sqlite3"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(Cli::try_parse_from(["kanband", "--log-backend", "kafka", "serve"]).is_err());
    }
}

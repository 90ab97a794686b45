//! Process wiring: open the log, build the projection, start the reader,
//! monitor and WebSocket server, and stop them together.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kanban_core::codec;
use kanban_core::seed::{default_seed, seeded_board};
use kanban_core::types::Board;
use tokio_util::sync::CancellationToken;

use crate::config::{BoardConfig, DaemonConfig, LogBackend, LogConfig, SeedSource};
use crate::hub::FanoutHub;
use crate::log::{MemoryLog, SharedLog, SqliteLog};
use crate::monitor::LivenessMonitor;
use crate::projection::{ProjectionStore, SharedProjection};
use crate::reader::{self, BatchStats, LogReader};
use crate::session::SessionCoordinator;
use crate::writer::LogWriter;
use crate::ws_server::WsServer;

/// How long background tasks get to wind down after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

pub fn open_log(config: &LogConfig) -> anyhow::Result<SharedLog> {
    let log: SharedLog = match config.backend {
        LogBackend::Sqlite => Arc::new(
            SqliteLog::open(&config.path, config.channel.clone())
                .with_context(|| format!("opening log at {}", config.path.display()))?,
        ),
        LogBackend::Memory => Arc::new(MemoryLog::new(config.channel.clone())),
    };
    Ok(log)
}

pub fn load_seed(source: &SeedSource) -> anyhow::Result<Option<Board>> {
    match source {
        SeedSource::Builtin => Ok(Some(default_seed())),
        SeedSource::None => Ok(None),
        SeedSource::File(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading seed file {}", path.display()))?;
            let board: Board = serde_json::from_str(&text)
                .with_context(|| format!("parsing seed file {}", path.display()))?;
            Ok(Some(board))
        }
    }
}

/// The board every run starts from before the log is replayed.
pub fn initial_board(config: &BoardConfig) -> anyhow::Result<Board> {
    anyhow::ensure!(!config.columns.is_empty(), "at least one column is required");
    let seed = load_seed(&config.seed)?;
    Ok(seeded_board(config.columns.iter().cloned(), seed.as_ref()))
}

pub fn build_projection(config: &BoardConfig) -> anyhow::Result<SharedProjection> {
    Ok(Arc::new(ProjectionStore::new(initial_board(config)?)))
}

/// Run the daemon until ctrl-c or SIGTERM.
pub async fn run_daemon(config: DaemonConfig) -> anyhow::Result<()> {
    run_daemon_until(config, shutdown_signal()).await
}

/// Run the daemon until `shutdown` resolves or a core task exits.
pub async fn run_daemon_until<F>(config: DaemonConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let log = open_log(&config.log)?;
    let store = build_projection(&config.board)?;
    let hub = Arc::new(FanoutHub::new(config.queue_capacity));
    let cancel = CancellationToken::new();

    let coordinator = Arc::new(SessionCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&hub),
        LogWriter::new(Arc::clone(&log)),
    ));
    let server = WsServer::new(config.listen, coordinator, cancel.clone())
        .with_max_connections(config.max_connections);
    let (listener, addr) = server
        .bind()
        .await
        .with_context(|| format!("binding {}", config.listen))?;

    tracing::info!(
        addr = %addr,
        backend = %config.log.backend,
        channel = %config.log.channel,
        group = %config.reader.group,
        columns = ?config.board.columns,
        "kanband starting"
    );

    let mut reader = LogReader::new(
        Arc::clone(&log),
        Arc::clone(&store),
        Arc::clone(&hub),
        config.reader.clone(),
        cancel.clone(),
    );
    let mut reader_handle = tokio::spawn(async move { reader.run().await });

    let mut monitor = LivenessMonitor::new(
        Arc::clone(&log),
        Arc::clone(&hub),
        config.monitor,
        cancel.clone(),
    );
    let mut monitor_handle = tokio::spawn(async move { monitor.run().await });

    let mut server_handle = tokio::spawn(async move { server.serve(listener).await });

    // A handle that already resolved inside the select must not be awaited again.
    let mut finished = [false; 3];
    tokio::select! {
        () = shutdown => {}
        _ = &mut reader_handle => {
            finished[0] = true;
            tracing::warn!("log reader exited unexpectedly");
        }
        _ = &mut monitor_handle => {
            finished[1] = true;
            tracing::warn!("liveness monitor exited unexpectedly");
        }
        result = &mut server_handle => {
            finished[2] = true;
            match result {
                Ok(Err(e)) => tracing::error!(error = %e, "ws server failed"),
                _ => tracing::warn!("ws server exited unexpectedly"),
            }
        }
    }

    cancel.cancel();
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        if !finished[0] {
            let _ = reader_handle.await;
        }
        if !finished[1] {
            let _ = monitor_handle.await;
        }
        if !finished[2] {
            let _ = server_handle.await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("background tasks did not stop within grace period");
    }

    tracing::info!(
        applied = store.applied().await,
        subscribers = hub.len(),
        "kanband stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for ctrl-c only");
                let _ = ctrl_c.await;
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received ctrl-c, shutting down");
    }
}

/// Validate `raw` as a board command and append it to the log. Backs
/// `kanband publish`.
pub async fn publish_command(config: &LogConfig, raw: &str) -> anyhow::Result<u64> {
    anyhow::ensure!(
        config.backend != LogBackend::Memory,
        "publish needs a durable log backend (memory logs are per-process)"
    );
    let event = codec::decode_event_str(raw).context("command is not a valid board event")?;
    anyhow::ensure!(
        event.is_mutation(),
        "`{}` is not a board command",
        event.kind()
    );

    let log = open_log(config)?;
    let offset = LogWriter::new(log)
        .publish(raw)
        .await
        .context("appending command")?;
    tracing::info!(offset, kind = event.kind(), "command published");
    Ok(offset)
}

/// Seed plus the whole channel, folded into one board. Backs `kanband replay`.
pub async fn replay_board(
    log_config: &LogConfig,
    board_config: &BoardConfig,
    batch_size: usize,
) -> anyhow::Result<(Board, BatchStats)> {
    let mut board = initial_board(board_config)?;
    let log = open_log(log_config)?;
    let (board, stats) = tokio::task::spawn_blocking(move || {
        reader::replay_log(log.as_ref(), &mut board, batch_size).map(|stats| (board, stats))
    })
    .await??;
    Ok((board, stats))
}

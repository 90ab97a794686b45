//! kanband: event-sourced kanban board synchronizer.
//! One process: log reader, liveness monitor and WebSocket server.

use clap::Parser;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("KANBAN_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let command = args
        .command
        .unwrap_or_else(|| cli::Command::Serve(cli::ServeOpts::default()));

    match command {
        cli::Command::Serve(opts) => {
            let config = opts.to_config(&args.log);
            kanban_daemon::daemon::run_daemon(config).await?;
        }
        cli::Command::Publish { json } => {
            let offset = kanban_daemon::daemon::publish_command(&args.log.to_config(), &json).await?;
            println!("{offset}");
        }
        cli::Command::Replay(opts) => {
            let (board, stats) = kanban_daemon::daemon::replay_board(
                &args.log.to_config(),
                &opts.board.to_config(),
                opts.batch_size,
            )
            .await?;
            tracing::info!(
                records = stats.fetched,
                applied = stats.applied,
                dropped = stats.dropped,
                "replay complete"
            );
            let json = if opts.compact {
                serde_json::to_string(&board)?
            } else {
                serde_json::to_string_pretty(&board)?
            };
            println!("{json}");
        }
    }

    Ok(())
}

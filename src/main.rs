//!
//! pgquota binary
//! --------------
//! Runs the passive pgwire listener with the SQL normalizer and logs every decoded query and
//! protocol message. Stops gracefully on SIGINT or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use pgquota::config::ServerConfig;
use pgquota::{logging, Server, SqlNormalizer, TracingSink};

#[derive(Parser, Debug)]
#[command(name = "pgquota")]
#[command(about = "Passive PostgreSQL wire-protocol listener with SQL normalization")]
struct Cli {
    /// Log level used when RUST_LOG is unset
    #[arg(long, env = "PGQUOTA_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Emit one JSON object per log line
    #[arg(long, env = "PGQUOTA_JSON_LOGS", global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Listen for PostgreSQL clients until interrupted
    Server(ServerArgs),
}

// Flags override the PGQUOTA_* environment, which overrides the defaults. The environment is read
// once, by ServerConfig::from_env.
#[derive(Args, Debug)]
struct ServerArgs {
    /// Listen address; host is optional (":5432" binds every interface) [env: PGQUOTA_LISTEN_ADDR]
    #[arg(short, long)]
    address: Option<String>,

    /// Upper bound on the graceful drain at shutdown [env: PGQUOTA_SHUTDOWN_TIMEOUT_SECS, default: 10]
    #[arg(long)]
    shutdown_timeout_secs: Option<u64>,

    /// Per-read deadline; only controls how often idle sessions re-check for shutdown
    /// [env: PGQUOTA_READ_TIMEOUT_SECS, default: 30]
    #[arg(long)]
    read_timeout_secs: Option<u64>,

    /// Largest accepted frame in bytes [env: PGQUOTA_MAX_MESSAGE_SIZE, default: 16 MiB]
    #[arg(long)]
    max_message_size: Option<usize>,

    /// Log every raw frame with a hex/ASCII preview (debug level) [env: PGQUOTA_PGWIRE_TRACE]
    #[arg(long)]
    trace_frames: bool,
}

impl ServerArgs {
    fn apply(self, mut cfg: ServerConfig) -> ServerConfig {
        if let Some(address) = self.address {
            cfg.listen_addr = address;
        }
        if let Some(secs) = self.shutdown_timeout_secs {
            cfg.shutdown_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.read_timeout_secs.filter(|s| *s > 0) {
            cfg.read_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = self.max_message_size {
            cfg.max_message_size = max;
        }
        if self.trace_frames {
            cfg.trace_frames = true;
        }
        cfg
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.json_logs)?;

    match cli.command {
        Command::Server(args) => run_server(args.apply(ServerConfig::from_env())).await,
    }
}

async fn run_server(cfg: ServerConfig) -> Result<()> {
    let address = cfg.listen_addr.clone();
    let shutdown_timeout = cfg.shutdown_timeout;
    info!(
        target: "pgquota",
        "pgquota starting: address={}, read_timeout={:?}, shutdown_timeout={:?}, trace_frames={}",
        address, cfg.read_timeout, shutdown_timeout, cfg.trace_frames
    );

    let server = Server::new(cfg, Arc::new(SqlNormalizer), Arc::new(TracingSink));
    let bound = server
        .start(&address)
        .await
        .with_context(|| format!("failed to start listener on '{}'", address))?;
    info!(target: "pgquota", "accepting PostgreSQL connections on {}", bound);

    shutdown_signal().await.context("failed to wait for shutdown signal")?;
    info!(target: "pgquota", "shutdown signal received, draining sessions (up to {:?})", shutdown_timeout);

    server.stop(shutdown_timeout).await.context("graceful shutdown did not complete")?;
    info!(target: "pgquota", "shutdown complete");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}

//! Huddle Server - real-time chat message router.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod config;
mod telemetry;

use config::{Config, Overrides};
use telemetry::LogFormat;

/// Huddle Server - real-time many-to-many chat router
#[derive(Parser, Debug)]
#[command(name = "huddle-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "HUDDLE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (default: 0.0.0.0:50051)
    #[arg(short, long, env = "HUDDLE_BIND")]
    bind: Option<SocketAddr>,

    /// Character that marks a recipient as a group tag (default: @)
    #[arg(long, env = "HUDDLE_GROUP_SIGIL")]
    group_sigil: Option<char>,

    /// Per-client outbound queue capacity (default: 256)
    #[arg(long, env = "HUDDLE_OUTBOUND_CAPACITY")]
    outbound_capacity: Option<usize>,

    /// Milliseconds to wait for room in a client's full queue (default: 5000)
    #[arg(long, env = "HUDDLE_DELIVERY_TIMEOUT_MS")]
    delivery_timeout_ms: Option<u64>,

    /// Longest accepted message line in bytes (default: 65536)
    #[arg(long, env = "HUDDLE_MAX_LINE_LENGTH")]
    max_line_length: Option<usize>,

    /// Log output format
    #[arg(long, value_enum, env = "HUDDLE_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            bind: self.bind,
            max_line_length: self.max_line_length,
            group_sigil: self.group_sigil,
            outbound_capacity: self.outbound_capacity,
            delivery_timeout_ms: self.delivery_timeout_ms,
            log_format: self.log_format,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply(&cli.overrides());

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    telemetry::init(config.logging.format)?;

    info!("Huddle Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &cli.config {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("No config file given, using defaults"),
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    huddle_router::start(config.server_config()?, shutdown)
        .await
        .with_context(|| format!("Chat server on {} failed", config.server.bind))?;

    info!("Huddle Server stopped");
    Ok(())
}

/// Cancel `token` on Ctrl-C, or SIGTERM on unix.
async fn shutdown_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }

    token.cancel();
}

//! CLI entry point for the transcode scheduler
//!
//! Parses command line arguments, installs logging, and runs the daemon until
//! Ctrl-C.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use transcode_scheduler::{Config, Daemon};

/// Transcode Scheduler - scans media libraries and queues transcode jobs
#[derive(Parser, Debug)]
#[command(name = "transcode-scheduler")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (defaults apply when it does not exist)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// JSON state file, overriding store.state_file
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Do not start the status HTTP server
    #[arg(long, default_value = "false")]
    no_server: bool,
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(state_file) = args.state_file {
        config.store.state_file = Some(state_file);
    }
    if args.no_server {
        config.server.enabled = false;
    }

    init_tracing(&config.logging.filter);
    info!(config = %args.config.display(), libraries = config.libraries.len(), "transcode scheduler starting");

    let daemon = match Daemon::new(config).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "failed to initialize daemon");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested"),
                Err(e) => error!(error = %e, "failed to listen for Ctrl-C, shutting down"),
            }
            cancel.cancel();
        });
    }

    if let Err(e) = daemon.run(cancel).await {
        error!(error = %e, "daemon error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

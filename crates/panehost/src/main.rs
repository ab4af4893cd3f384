// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use panehost::config::Settings;
use panehost::journal::{Claim, CommsRow};

#[derive(Parser)]
#[command(name = "panehost", version, about = "Per-pane injection and lifecycle coordinator for PTY-hosted CLI agents.")]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    subcommand: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Materialize the canonical handoff document from a comms-journal and
    /// claims snapshot, then exit. The PTY/renderer bridge that normally
    /// drives a long-running coordinator is supplied by the embedding host
    /// process, not this binary; this is the one operation the crate can
    /// run fully standalone.
    Materialize(MaterializeArgs),
}

#[derive(clap::Args)]
struct MaterializeArgs {
    /// JSON file containing an array of comms-journal rows.
    #[arg(long)]
    comms_journal: std::path::PathBuf,

    /// JSON file containing an array of unresolved claims.
    #[arg(long)]
    claims: std::path::PathBuf,

    /// Session identifier recorded in the handoff header.
    #[arg(long, default_value_t = uuid::Uuid::new_v4().to_string())]
    session_id: String,
}

fn init_tracing(settings: &Settings) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let result = match settings.log_format.as_str() {
        "json" => tracing_subscriber::fmt().with_env_filter(filter).json().try_init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

fn run_materialize(settings: &Settings, args: MaterializeArgs) -> anyhow::Result<()> {
    let rows: Vec<CommsRow> = serde_json::from_str(&std::fs::read_to_string(&args.comms_journal)?)?;
    let claims: Vec<Claim> = serde_json::from_str(&std::fs::read_to_string(&args.claims)?)?;

    let now_ms = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0);
    let meta = panehost::handoff::HandoffMeta { source: "panehost-cli".to_string(), session_id: args.session_id };
    let document = panehost::handoff::materialize(&rows, &claims, now_ms, &meta);

    let path = settings.handoff_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let outcome = panehost::handoff::write_session_handoff(&path, &document, settings.legacy_handoff_path.as_deref(), &[])?;
    info!(path = %path.display(), written = outcome.written, "materialized handoff document");
    Ok(())
}

/// Waits for the first of SIGTERM/SIGINT, cancels `shutdown`, then waits for
/// a second signal to force an immediate exit (teacher's `run.rs` two-stage
/// signal handler, unchanged for this single-process coordinator).
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async { if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM");
            }
            _ = async { if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async { if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async { if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let settings = cli.settings;

    if let Err(e) = settings.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }
    init_tracing(&settings);

    match cli.subcommand {
        Some(Commands::Materialize(args)) => {
            if let Err(e) = run_materialize(&settings, args) {
                error!("fatal: {e:#}");
                std::process::exit(1);
            }
        }
        None => {
            let shutdown = CancellationToken::new();
            spawn_signal_handler(shutdown.clone());
            info!("panehost coordinator initialized; awaiting the embedding host's PTY/renderer bridge");
            shutdown.cancelled().await;
            info!("shutting down");
        }
    }
}

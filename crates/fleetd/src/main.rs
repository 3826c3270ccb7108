//! fleetd — the fleet daemon.
//!
//! Single binary that assembles the fleet subsystems:
//! - Panel client (HTTP, or in-memory for dry runs)
//! - Fleet manager (registry, scaling, admission)
//! - Reconcile loop
//! - REST API
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleetgrid/fleet.toml --port 8080
//! fleetd check --config /etc/fleetgrid/fleet.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info, warn};

use fleet_core::FleetConfig;
use fleetgrid_manager::FleetManager;
use fleetgrid_panel::{HttpPanelClient, InMemoryPanel, PanelClient};

#[derive(Parser)]
#[command(name = "fleetd", about = "Game-server fleet daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the fleet manager and its API server.
    Run {
        /// Path to fleet.toml.
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Use an in-process panel instead of the configured one.
        #[arg(long)]
        memory_panel: bool,
    },
    /// Validate a config file and print it with defaults filled in and keys masked.
    Check {
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            port,
            memory_panel,
        } => run(&config, port, memory_panel).await,
        Command::Check { config } => check(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,fleetd=debug,fleetgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = FleetConfig::from_file(path)?;
    print!("{}", config.redacted().to_toml_string()?);
    info!(path = %path.display(), "config is valid");
    Ok(())
}

async fn run(config_path: &Path, port: u16, memory_panel: bool) -> anyhow::Result<()> {
    info!("fleet daemon starting");

    let config = FleetConfig::from_file(config_path)?;
    info!(
        path = %config_path.display(),
        max_total = config.policy.max_total_instances,
        min_idle = config.policy.min_idle_instances,
        "config loaded"
    );

    // ── Panel ──────────────────────────────────────────────────

    let panel: Arc<dyn PanelClient> = if memory_panel {
        warn!("using in-memory panel, no real servers will be created");
        Arc::new(InMemoryPanel::new())
    } else {
        let client = HttpPanelClient::new(&config.panel)
            .context("failed to build panel client")?
            .with_name_prefix(config.policy.name_prefix.clone());
        info!(base_url = %config.panel.base_url, node_id = config.panel.node_id, "panel client ready");
        Arc::new(client)
    };

    let manager = Arc::new(FleetManager::from_config(&config, panel));

    // Rebuild bookkeeping from the panel before taking traffic.
    match manager.reconcile().await {
        Ok(report) => info!(
            seen = report.seen,
            inserted = report.inserted,
            "initial reconcile complete"
        ),
        Err(e) => error!(error = %e, "initial reconcile failed, starting with an empty registry"),
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background loop ────────────────────────────────────────

    let loop_handle = tokio::spawn({
        let manager = manager.clone();
        async move { manager.run(shutdown_rx).await }
    });

    // ── API server ─────────────────────────────────────────────

    let router = fleetgrid_api::build_router(manager);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = loop_handle.await;

    info!("fleet daemon stopped");
    Ok(())
}

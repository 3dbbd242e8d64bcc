//! # velocity-relay
//!
//! Relay server binary: loads settings, opens the database, and serves the
//! HTTP/WebSocket surface until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use velocity_server::config::ServerConfig;
use velocity_server::server::VelocityServer;
use velocity_settings::VelocitySettings;
use velocity_store::{ConnectionConfig, SqliteStore};

/// Upper bound on how long shutdown waits for the listener and sweep.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Telemetry relay server.
#[derive(Parser, Debug)]
#[command(name = "velocity-relay", about = "Real-time telemetry relay server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database, or `:memory:` (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Settings file to load instead of `~/.velocity/settings.json`.
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    /// Flags win over every other settings layer.
    fn apply(&self, settings: &mut VelocitySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.database.path = path.display().to_string();
        }
    }
}

fn open_store(settings: &VelocitySettings) -> Result<SqliteStore> {
    let config = ConnectionConfig {
        pool_size: settings.database.pool_size,
        ..ConnectionConfig::default()
    };
    let pool = if settings.database.is_in_memory() {
        velocity_store::new_in_memory(&config).context("Failed to open in-memory database")?
    } else {
        let path = settings.database.resolved_path();
        velocity_store::new_file(&path, &config)
            .with_context(|| format!("Failed to open database at {}", path.display()))?
    };
    SqliteStore::new(pool).context("Failed to run database migrations")
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => velocity_settings::load_settings_from_path(path),
        None => velocity_settings::load_settings(),
    }
    .context("Failed to load settings")?;
    cli.apply(&mut settings);

    velocity_core::logging::init_subscriber(&settings.logging.level, settings.json_logs());
    tracing::info!(
        environment = %settings.server.environment,
        database = %settings.database.path,
        "starting velocity relay"
    );

    let store = Arc::new(open_store(&settings)?);

    let metrics = match velocity_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder not installed");
            None
        }
    };

    let config = ServerConfig::from_settings(&settings);
    let server = VelocityServer::new(config, store.clone(), store, metrics);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    let mut tasks = vec![handle];
    if let Some(sweeper) = server.spawn_sweeper() {
        tasks.push(sweeper);
    }
    tracing::info!("velocity relay listening on http://{addr}");

    shutdown_signal().await?;

    tracing::info!("shutting down");
    let aborted = server
        .shutdown()
        .graceful_shutdown(tasks, Some(SHUTDOWN_TIMEOUT))
        .await;
    tracing::info!(aborted, "shutdown complete");
    Ok(())
}

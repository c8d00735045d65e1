//! `pulse` binary: load settings, start logging, serve the dashboard.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use pulse_core::records::{Activity, ActivityKind, ActivityStatus};
use pulse_server::feed::publish_activity;
use pulse_server::metrics::install_recorder;
use pulse_server::{PulseServer, ServerConfig};
use pulse_settings::{LogFormat, PulseSettings};
use pulse_telemetry::{SysinfoHost, TelemetryConfig, init_telemetry};
use tracing::{info, warn};

/// MLOps dashboard backend.
#[derive(Debug, Parser)]
#[command(name = "pulse", version, about)]
struct Cli {
    /// Settings file (defaults to `~/.pulse/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,
    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
    /// Log output format: `compact` or `json`.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn load(&self) -> anyhow::Result<PulseSettings> {
        let mut settings = match &self.config {
            Some(path) => pulse_settings::load_settings_from_path(path)
                .with_context(|| format!("loading settings from {}", path.display()))?,
            None => pulse_settings::load_settings().context("loading settings")?,
        };
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = cli.load()?;

    let logging = &settings.logging;
    let _ = init_telemetry(&TelemetryConfig::from_names(
        &logging.level,
        &logging.modules,
        logging.format == LogFormat::Json,
    ));

    let config = ServerConfig::from_settings(&settings);
    for dir in [&config.uploads_dir, &config.models_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let mut server = PulseServer::new(config, Box::new(SysinfoHost::new()));
    match install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics recorder unavailable, /metrics disabled"),
    }

    let state = server.state();
    publish_activity(
        &state.store,
        &state.bus,
        Activity::new(
            ActivityKind::System,
            "System started",
            "Pulse dashboard backend is online",
            ActivityStatus::Info,
        ),
    );

    let tasks = server.start_background();
    let (addr, serve) = server.listen().await.context("binding listener")?;
    info!(%addr, tasks, "pulse ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;
    info!("shutting down");

    if !server.shutdown().await {
        warn!("background tasks did not stop within the shutdown timeout");
    }
    let _ = server
        .state()
        .shutdown
        .graceful_shutdown(vec![serve], server.config().shutdown_timeout)
        .await;
    Ok(())
}

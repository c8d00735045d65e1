//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use pulse_settings::{DashboardSettings, PulseSettings};

use crate::websocket::registry::RegistryConfig;

/// Resolved configuration for one server instance.
///
/// Built from [`PulseSettings`] with every interval converted to a
/// [`Duration`] and every path to a [`PathBuf`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Connections silent for longer than this are stale.
    pub stale_after: Duration,
    /// Minimum gap between gated stale sweeps.
    pub cleanup_interval: Duration,
    /// Heartbeat window for counting a connection as active.
    pub active_window: Duration,
    /// Heartbeat age past which low-priority broadcasts are skipped.
    pub slow_after: Duration,
    /// Period of the `system_metrics` broadcast.
    pub metrics_interval: Duration,
    /// Minimum gap between `request_metrics` replies per connection.
    pub metrics_min_gap: Duration,
    /// Outbound frames buffered per connection.
    pub send_queue_capacity: usize,
    /// Maximum accepted upload size.
    pub max_upload_bytes: usize,
    /// Allowed CORS origins; empty allows any.
    pub cors_origins: Vec<String>,
    /// Cache capacity.
    pub cache_max_size: usize,
    /// TTL applied when none is given.
    pub cache_default_ttl: Duration,
    /// Period of the cache expiry sweep.
    pub cache_cleanup_interval: Duration,
    /// Blocking housekeeping concurrency.
    pub max_workers: usize,
    /// How long shutdown waits for periodic tasks.
    pub shutdown_timeout: Duration,
    /// Period of the model accuracy drift task.
    pub accuracy_drift_interval: Duration,
    /// Where uploads are written.
    pub uploads_dir: PathBuf,
    /// Where model artifacts are written.
    pub models_dir: PathBuf,
    /// Whether the upload cleanup task is registered.
    pub cleanup_enabled: bool,
    /// Uploads older than this are removed.
    pub upload_max_age: Duration,
    /// Extensions eligible for upload cleanup.
    pub upload_extensions: Vec<String>,
    /// Undeployed models unused for longer than this are removed.
    pub model_max_inactive: Duration,
    /// Period of the upload cleanup task.
    pub upload_cleanup_interval: Duration,
    /// Delay before the first upload cleanup.
    pub upload_cleanup_initial_delay: Duration,
    /// Delay between training stages.
    pub stage_delay: Duration,
    /// Delay between pipeline steps.
    pub pipeline_step_delay: Duration,
    /// Active training jobs at which status reports `busy`.
    pub busy_threshold: usize,
    /// Initial user-facing dashboard settings.
    pub dashboard: DashboardSettings,
}

const DAY_SECS: u64 = 86_400;

impl ServerConfig {
    /// Resolve from loaded settings.
    pub fn from_settings(settings: &PulseSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_connections: server.max_connections,
            stale_after: Duration::from_secs(server.stale_after_secs),
            cleanup_interval: Duration::from_secs(server.cleanup_interval_secs),
            active_window: Duration::from_secs(server.active_window_secs),
            slow_after: Duration::from_secs(server.slow_client_secs),
            metrics_interval: Duration::from_secs(server.metrics_interval_secs),
            metrics_min_gap: Duration::from_secs(server.metrics_min_gap_secs),
            send_queue_capacity: server.send_queue_capacity,
            max_upload_bytes: server.max_upload_mb.saturating_mul(1024 * 1024),
            cors_origins: server.cors_origins.clone(),
            cache_max_size: settings.cache.max_size,
            cache_default_ttl: Duration::from_secs(settings.cache.default_ttl_secs),
            cache_cleanup_interval: Duration::from_secs(settings.cache.cleanup_interval_secs),
            max_workers: settings.scheduler.max_workers,
            shutdown_timeout: Duration::from_secs(settings.scheduler.shutdown_timeout_secs),
            accuracy_drift_interval: Duration::from_secs(
                settings.scheduler.accuracy_drift_interval_secs,
            ),
            uploads_dir: PathBuf::from(&settings.storage.uploads_dir),
            models_dir: PathBuf::from(&settings.storage.models_dir),
            cleanup_enabled: settings.cleanup.enabled,
            upload_max_age: Duration::from_secs(
                settings.cleanup.upload_max_age_days.saturating_mul(DAY_SECS),
            ),
            upload_extensions: settings.cleanup.upload_extensions.clone(),
            model_max_inactive: Duration::from_secs(
                settings.cleanup.model_max_inactive_days.saturating_mul(DAY_SECS),
            ),
            upload_cleanup_interval: Duration::from_secs(settings.cleanup.interval_secs),
            upload_cleanup_initial_delay: Duration::from_secs(settings.cleanup.initial_delay_secs),
            stage_delay: Duration::from_millis(settings.training.stage_delay_ms),
            pipeline_step_delay: Duration::from_millis(settings.training.pipeline_step_delay_ms),
            busy_threshold: settings.training.busy_threshold,
            dashboard: settings.dashboard.clone(),
        }
    }

    /// The registry's slice of this configuration.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_connections: self.max_connections,
            stale_after: self.stale_after,
            cleanup_interval: self.cleanup_interval,
            active_window: self.active_window,
            slow_after: self.slow_after,
        }
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&PulseSettings::default())
    }
}

//! Server, connection, cache and scheduler settings.

use serde::{Deserialize, Serialize};

/// Network listener and WebSocket policy settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP + WebSocket port.
    pub port: u16,
    /// Maximum simultaneous WebSocket connections.
    pub max_connections: usize,
    /// A connection without a heartbeat for this long is evicted.
    pub stale_after_secs: u64,
    /// Minimum spacing between gated stale-connection sweeps.
    pub cleanup_interval_secs: u64,
    /// Heartbeat recency that counts a connection as active in stats.
    pub active_window_secs: u64,
    /// Heartbeat age beyond which low-priority broadcasts skip a connection.
    pub slow_client_secs: u64,
    /// Interval of the periodic `system_metrics` broadcast.
    pub metrics_interval_secs: u64,
    /// Minimum gap between on-demand metrics replies to one connection.
    pub metrics_min_gap_secs: u64,
    /// Per-connection outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Maximum accepted upload size in megabytes.
    pub max_upload_mb: usize,
    /// Allowed CORS origins. Empty means permissive.
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_connections: 100,
            stale_after_secs: 120,
            cleanup_interval_secs: 300,
            active_window_secs: 60,
            slow_client_secs: 30,
            metrics_interval_secs: 5,
            metrics_min_gap_secs: 5,
            send_queue_capacity: 256,
            max_upload_mb: 50,
            cors_origins: Vec::new(),
        }
    }
}

/// TTL cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// TTL applied when a caller does not pass one.
    pub default_ttl_secs: u64,
    /// Maximum number of entries.
    pub max_size: usize,
    /// Interval of the periodic expired-entry sweep.
    pub cleanup_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            max_size: 1000,
            cleanup_interval_secs: 60,
        }
    }
}

/// Periodic task scheduler settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerSettings {
    /// Concurrent blocking task invocations.
    pub max_workers: usize,
    /// How long shutdown waits for task loops before abandoning them.
    pub shutdown_timeout_secs: u64,
    /// Interval of the simulated model accuracy drift.
    pub accuracy_drift_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            shutdown_timeout_secs: 30,
            accuracy_drift_interval_secs: 30,
        }
    }
}

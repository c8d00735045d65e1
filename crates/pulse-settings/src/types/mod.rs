//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a partial
//! JSON file only needs the keys it overrides.

mod dashboard;
mod server;
mod storage;

pub use dashboard::*;
pub use server::*;
pub use storage::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the Pulse backend.
///
/// Loaded from `~/.pulse/settings.json` with defaults applied for missing
/// fields. Environment variables can override specific values.
///
/// ```json
/// {
///   "server": { "port": 9000, "maxConnections": 50 },
///   "cache": { "defaultTtlSecs": 60 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    /// Listener and WebSocket policy.
    pub server: ServerSettings,
    /// TTL cache.
    pub cache: CacheSettings,
    /// Periodic task scheduler.
    pub scheduler: SchedulerSettings,
    /// Upload and model directories.
    pub storage: StorageSettings,
    /// Old-file cleanup.
    pub cleanup: CleanupSettings,
    /// Simulated training and pipelines.
    pub training: TrainingSettings,
    /// Logging.
    pub logging: LoggingSettings,
    /// Initial dashboard preferences.
    pub dashboard: DashboardSettings,
}

impl PulseSettings {
    /// Reject values that would make a component unusable.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.server.max_connections == 0, "server.maxConnections must be > 0"),
            (self.server.send_queue_capacity == 0, "server.sendQueueCapacity must be > 0"),
            (self.server.metrics_interval_secs == 0, "server.metricsIntervalSecs must be > 0"),
            (self.cache.max_size == 0, "cache.maxSize must be > 0"),
            (self.cache.cleanup_interval_secs == 0, "cache.cleanupIntervalSecs must be > 0"),
            (self.scheduler.max_workers == 0, "scheduler.maxWorkers must be > 0"),
            (self.cleanup.interval_secs == 0, "cleanup.intervalSecs must be > 0"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(SettingsError::InvalidValue((*message).to_string())),
            None => Ok(()),
        }
    }
}

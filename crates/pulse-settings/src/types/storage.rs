//! Storage, cleanup, training and logging settings.

use serde::{Deserialize, Serialize};

/// Where uploads and model artifacts are written.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Directory for uploaded CSV files.
    pub uploads_dir: String,
    /// Directory for model artifacts.
    pub models_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            uploads_dir: "uploads".to_string(),
            models_dir: "models".to_string(),
        }
    }
}

/// Old-file cleanup policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CleanupSettings {
    /// Whether the periodic sweep is registered at all.
    pub enabled: bool,
    /// Uploads older than this are removed.
    pub upload_max_age_days: u64,
    /// Models neither used nor deployed for this long are removed.
    pub model_max_inactive_days: u64,
    /// Extensions (without dot) eligible for upload cleanup.
    pub upload_extensions: Vec<String>,
    /// Sweep interval.
    pub interval_secs: u64,
    /// Delay before the first sweep.
    pub initial_delay_secs: u64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            upload_max_age_days: 7,
            model_max_inactive_days: 14,
            upload_extensions: ["csv", "txt", "json", "xlsx"]
                .into_iter()
                .map(String::from)
                .collect(),
            interval_secs: 3600,
            initial_delay_secs: 300,
        }
    }
}

/// Simulated training settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainingSettings {
    /// Pause between training stages.
    pub stage_delay_ms: u64,
    /// Pause between pipeline steps.
    pub pipeline_step_delay_ms: u64,
    /// Running jobs at or above this count report the system as busy.
    pub busy_threshold: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            stage_delay_ms: 800,
            pipeline_step_delay_ms: 1500,
            busy_threshold: 3,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Per-module overrides, e.g. `{"pulse_server": "debug"}`.
    pub modules: std::collections::BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            modules: std::collections::BTreeMap::new(),
        }
    }
}

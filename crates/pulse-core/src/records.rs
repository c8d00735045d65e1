//! Domain records held by the dashboard store.
//!
//! These are plain data: the store owns them and hands out clones. Wire
//! format is snake_case JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ActivityId, AlertId, DatasetId, JobId, ModelId, PipelineId};

// ─────────────────────────────────────────────────────────────────────────────
// Models
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a trained model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    /// Trained and available for predictions.
    #[default]
    Active,
    /// Promoted to serve traffic.
    Deployed,
}

/// A trained model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Model ID.
    pub id: ModelId,
    /// Human-readable name.
    pub name: String,
    /// Requested algorithm family (free-form, e.g. `random_forest`).
    pub model_type: String,
    /// Held-out score in `[0, 1]`.
    pub accuracy: f64,
    /// Current status.
    pub status: ModelStatus,
    /// When training finished.
    pub created_at: DateTime<Utc>,
    /// When the model was deployed, if ever.
    pub deployed_at: Option<DateTime<Utc>>,
    /// Number of predictions served.
    pub predictions_made: u64,
    /// Input feature columns.
    pub feature_names: Vec<String>,
    /// Column the model predicts.
    pub target_column: String,
    /// The label the fitted baseline always predicts.
    pub predicted_label: String,
    /// Rows seen during training.
    pub training_rows: usize,
    /// Last prediction or deployment, if any.
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

impl ModelRecord {
    /// When the model was last touched: its last use, else its creation.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_used.unwrap_or(self.created_at)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Training jobs
// ─────────────────────────────────────────────────────────────────────────────

/// Training job state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not started.
    #[default]
    Pending,
    /// Stages in progress.
    Training,
    /// Finished with a model.
    Completed,
    /// Aborted with an error.
    Failed,
    /// Stopped by server shutdown.
    Cancelled,
}

impl JobStatus {
    /// Whether the job has reached a terminal state.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A training job and its progress.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainingJob {
    /// Job ID.
    pub id: JobId,
    /// Current status.
    pub status: JobStatus,
    /// Progress percentage (0-100).
    pub progress: u8,
    /// Current stage message.
    pub message: String,
    /// Requested model type.
    pub model_type: String,
    /// Path of the CSV being trained on.
    pub file_path: String,
    /// Explicit target column, if the caller chose one.
    pub target_column: Option<String>,
    /// Resulting model, once completed.
    pub model_id: Option<ModelId>,
    /// Error description, once failed.
    pub error: Option<String>,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the job finished.
    pub completed_at: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipelines
// ─────────────────────────────────────────────────────────────────────────────

/// Pipeline run state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Defined but never run.
    #[default]
    Draft,
    /// A run is in progress.
    Running,
    /// The last run finished.
    Completed,
    /// The last run failed.
    Failed,
}

/// One step of a pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Display name.
    pub name: String,
    /// Step kind (e.g. `data_ingestion`, `training`).
    #[serde(rename = "type", default)]
    pub step_type: String,
    /// Opaque step configuration.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A user-defined pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline ID.
    pub id: PipelineId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Ordered steps.
    pub steps: Vec<PipelineStep>,
    /// Current state.
    pub status: PipelineState,
    /// Progress of the current or last run (0-100).
    pub progress: u8,
    /// Number of runs started.
    pub run_count: u64,
    /// When the pipeline was created.
    pub created_at: DateTime<Utc>,
    /// When the pipeline was last modified.
    pub updated_at: DateTime<Utc>,
    /// When the last run started.
    pub last_run: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Datasets
// ─────────────────────────────────────────────────────────────────────────────

/// An uploaded CSV dataset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dataset {
    /// Dataset ID.
    pub id: DatasetId,
    /// Original file name.
    pub name: String,
    /// Where the file was saved.
    pub file_path: String,
    /// Data rows (header excluded).
    pub rows: usize,
    /// Header columns.
    pub columns: Vec<String>,
    /// File size on disk.
    pub size_bytes: u64,
    /// Upload time.
    pub uploaded_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Alerts and activity
// ─────────────────────────────────────────────────────────────────────────────

/// Alert severity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Informational.
    #[default]
    Info,
    /// Needs attention.
    Warning,
    /// Needs immediate attention.
    Critical,
}

/// A monitoring alert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert ID.
    pub id: AlertId,
    /// Short title.
    pub title: String,
    /// Detail message.
    pub message: String,
    /// Severity.
    pub severity: AlertSeverity,
    /// Subsystem that raised the alert.
    pub source: String,
    /// Raise time.
    pub created_at: DateTime<Utc>,
    /// Whether an operator acknowledged it.
    pub acknowledged: bool,
    /// Who acknowledged it.
    pub acknowledged_by: Option<String>,
    /// When it was acknowledged.
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Category of an activity log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// File uploads.
    Upload,
    /// Training jobs.
    Training,
    /// Model deployments.
    Deployment,
    /// Pipeline runs.
    Pipeline,
    /// Health and alert events.
    Monitoring,
    /// Process lifecycle.
    System,
}

/// Outcome attached to an activity entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    /// Something succeeded.
    Success,
    /// Something failed.
    Error,
    /// Something to watch.
    Warning,
    /// Neutral.
    #[default]
    Info,
}

/// One line of the dashboard activity feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Entry ID.
    pub id: ActivityId,
    /// Category.
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    /// Short title.
    pub title: String,
    /// Detail text.
    pub description: String,
    /// Outcome.
    pub status: ActivityStatus,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

impl Activity {
    /// Build a new entry stamped with the current time.
    pub fn new(
        kind: ActivityKind,
        title: impl Into<String>,
        description: impl Into<String>,
        status: ActivityStatus,
    ) -> Self {
        Self {
            id: ActivityId::new(),
            kind,
            title: title.into(),
            description: description.into(),
            status,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_terminal_states() {
        assert!(!JobStatus::Pending.is_finished());
        assert!(!JobStatus::Training.is_finished());
        assert!(JobStatus::Completed.is_finished());
        assert!(JobStatus::Failed.is_finished());
        assert!(JobStatus::Cancelled.is_finished());
    }

    #[test]
    fn activity_serializes_kind_as_type() {
        let activity = Activity::new(
            ActivityKind::Upload,
            "File uploaded",
            "iris.csv",
            ActivityStatus::Success,
        );
        let json = serde_json::to_value(&activity).unwrap();
        assert_eq!(json["type"], "upload");
        assert_eq!(json["status"], "success");
        assert_eq!(json["title"], "File uploaded");
    }

    #[test]
    fn pipeline_step_defaults_missing_fields() {
        let step: PipelineStep = serde_json::from_str(r#"{"name":"ingest"}"#).unwrap();
        assert_eq!(step.name, "ingest");
        assert!(step.step_type.is_empty());
        assert!(step.config.is_null());
    }

    #[test]
    fn model_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ModelStatus::Deployed).unwrap(),
            "\"deployed\""
        );
        assert_eq!(
            serde_json::to_string(&PipelineState::Running).unwrap(),
            "\"running\""
        );
    }
}

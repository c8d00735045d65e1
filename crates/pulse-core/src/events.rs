//! Broadcast event envelope.
//!
//! Every message pushed to WebSocket clients is a JSON object with a `type`
//! discriminator. [`DashboardEvent`] is the typed form of those messages;
//! serializing one yields exactly the wire object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::SystemHealth;
use crate::ids::{DatasetId, JobId, ModelId, PipelineId};
use crate::records::{Activity, Alert, PipelineState};

/// Delivery hint attached to a broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Deliver to every live connection.
    #[default]
    Normal,
    /// Skip connections that have not sent a heartbeat recently.
    Low,
}

/// Periodic host + application metrics snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// Sample time.
    pub timestamp: DateTime<Utc>,
    /// Global CPU utilization (percent, 1 dp).
    pub cpu_percent: f64,
    /// Memory utilization (percent, 1 dp).
    pub memory_percent: f64,
    /// Root filesystem utilization (percent, 1 dp).
    pub disk_percent: f64,
    /// Live WebSocket connections.
    pub active_connections: usize,
    /// Models in the store.
    pub total_models: usize,
    /// Training jobs currently running.
    pub active_training_jobs: usize,
    /// Installed memory in GiB.
    pub memory_total_gb: f64,
    /// Used memory in GiB.
    pub memory_used_gb: f64,
    /// Root filesystem size in GiB.
    pub disk_total_gb: f64,
    /// Root filesystem used space in GiB.
    pub disk_used_gb: f64,
    /// Root filesystem free space in GiB.
    pub disk_free_gb: f64,
    /// Running processes.
    pub process_count: usize,
    /// Host uptime in hours.
    pub uptime_hours: f64,
    /// Cumulative bytes transmitted over all interfaces.
    pub network_bytes_sent: u64,
    /// Cumulative bytes received over all interfaces.
    pub network_bytes_recv: u64,
    /// Load-derived API latency estimate.
    pub api_response_time_ms: f64,
    /// Load-derived WebSocket latency estimate.
    pub ws_response_time_ms: f64,
    /// Progress of the most recent running training job.
    pub training_progress: Option<u8>,
    /// Stage message of the most recent running training job.
    pub training_message: Option<String>,
    /// Logical CPUs.
    pub cpu_cores: usize,
    /// One-minute load average.
    pub load_average_1m: f64,
    /// Health classification of this sample.
    pub system_health: SystemHealth,
}

/// A message broadcast to dashboard clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    /// Periodic metrics push.
    SystemMetrics(SystemMetrics),
    /// Host health moved between classifications.
    HealthChange {
        /// Classification before this sample.
        previous: SystemHealth,
        /// Classification now.
        current: SystemHealth,
        /// CPU at the time of the change.
        cpu_percent: f64,
        /// Memory at the time of the change.
        memory_percent: f64,
        /// Disk at the time of the change.
        disk_percent: f64,
        /// When the change was detected.
        timestamp: DateTime<Utc>,
    },
    /// A training stage started.
    TrainingProgress {
        /// Job being trained.
        job_id: JobId,
        /// Overall progress (0-100).
        progress: u8,
        /// Stage description.
        message: String,
        /// Zero-based stage index.
        stage_index: usize,
        /// Number of stages.
        total_stages: usize,
    },
    /// Training finished successfully.
    TrainingCompleted {
        /// Finished job.
        job_id: JobId,
        /// Resulting model.
        model_id: ModelId,
        /// Score of the resulting model.
        accuracy: f64,
    },
    /// Training aborted.
    TrainingFailed {
        /// Failed job.
        job_id: JobId,
        /// What went wrong.
        error: String,
    },
    /// A pipeline step started.
    PipelineProgress {
        /// Running pipeline.
        pipeline_id: PipelineId,
        /// Step name.
        step: String,
        /// Zero-based step index.
        step_index: usize,
        /// Number of steps.
        total_steps: usize,
        /// Overall progress (0-100).
        progress: u8,
    },
    /// A pipeline run finished.
    PipelineCompleted {
        /// Pipeline that ran.
        pipeline_id: PipelineId,
        /// Wall time of the run.
        duration_secs: f64,
    },
    /// A pipeline run aborted.
    PipelineFailed {
        /// Pipeline that ran.
        pipeline_id: PipelineId,
        /// What went wrong.
        error: String,
    },
    /// A pipeline changed state outside a run (created, edited, deleted).
    PipelineStatus {
        /// Pipeline concerned.
        pipeline_id: PipelineId,
        /// Its state now.
        status: PipelineState,
        /// Short description of the change.
        message: String,
    },
    /// A model was promoted.
    ModelDeployed {
        /// Deployed model.
        model_id: ModelId,
        /// Its display name.
        name: String,
    },
    /// A model's live score moved.
    ModelMetrics {
        /// Model concerned.
        model_id: ModelId,
        /// Current score.
        accuracy: f64,
        /// Predictions served so far.
        predictions_made: u64,
    },
    /// An upload was parsed and registered.
    DatasetProcessed {
        /// New dataset.
        dataset_id: DatasetId,
        /// File name.
        name: String,
        /// Data rows.
        rows: usize,
        /// Column count.
        columns: usize,
    },
    /// A monitoring alert was raised.
    SystemAlert {
        /// The alert.
        alert: Alert,
    },
    /// A new activity feed entry.
    ActivityUpdate {
        /// The entry.
        activity: Activity,
    },
}

impl DashboardEvent {
    /// The wire `type` discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SystemMetrics(_) => "system_metrics",
            Self::HealthChange { .. } => "health_change",
            Self::TrainingProgress { .. } => "training_progress",
            Self::TrainingCompleted { .. } => "training_completed",
            Self::TrainingFailed { .. } => "training_failed",
            Self::PipelineProgress { .. } => "pipeline_progress",
            Self::PipelineCompleted { .. } => "pipeline_completed",
            Self::PipelineFailed { .. } => "pipeline_failed",
            Self::PipelineStatus { .. } => "pipeline_status",
            Self::ModelDeployed { .. } => "model_deployed",
            Self::ModelMetrics { .. } => "model_metrics",
            Self::DatasetProcessed { .. } => "dataset_processed",
            Self::SystemAlert { .. } => "system_alert",
            Self::ActivityUpdate { .. } => "activity_update",
        }
    }
}

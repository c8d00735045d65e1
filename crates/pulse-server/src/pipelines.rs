//! Pipeline runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pulse_core::records::{Activity, ActivityKind, ActivityStatus, Pipeline, PipelineState};
use pulse_core::{DashboardEvent, PipelineId, Priority};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::feed::publish_activity;
use crate::jobs::JobSupervisor;
use crate::store::DashboardStore;
use crate::websocket::broadcast::BroadcastBus;

/// Why a run could not start.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Unknown pipeline.
    #[error("pipeline not found")]
    NotFound,
    /// A run is already in progress.
    #[error("pipeline is already running")]
    AlreadyRunning,
    /// Nothing to run.
    #[error("pipeline has no steps")]
    NoSteps,
}

/// Steps through pipelines, broadcasting progress.
pub struct PipelineRunner {
    store: Arc<DashboardStore>,
    bus: Arc<BroadcastBus>,
    jobs: Arc<JobSupervisor>,
    step_delay: Duration,
}

impl PipelineRunner {
    /// Create a runner whose runs are owned by `jobs`.
    pub fn new(
        store: Arc<DashboardStore>,
        bus: Arc<BroadcastBus>,
        jobs: Arc<JobSupervisor>,
        step_delay: Duration,
    ) -> Self {
        Self {
            store,
            bus,
            jobs,
            step_delay,
        }
    }

    /// Mark the pipeline running and step through it in the background.
    pub fn start(self: &Arc<Self>, id: &PipelineId) -> Result<Pipeline, PipelineError> {
        let current = self.store.pipeline(id).ok_or(PipelineError::NotFound)?;
        if current.status == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning);
        }
        if current.steps.is_empty() {
            return Err(PipelineError::NoSteps);
        }

        let pipeline = self
            .store
            .update_pipeline(id, |p| {
                p.status = PipelineState::Running;
                p.progress = 0;
                p.run_count += 1;
                p.last_run = Some(Utc::now());
                p.updated_at = Utc::now();
            })
            .ok_or(PipelineError::NotFound)?;

        let runner = Arc::clone(self);
        let snapshot = pipeline.clone();
        self.jobs.spawn("pipeline", move |token| async move {
            tokio::select! {
                biased;
                () = token.cancelled() => runner.cancel(&snapshot),
                () = runner.run(&snapshot) => {}
            }
        });
        Ok(pipeline)
    }

    fn cancel(&self, pipeline: &Pipeline) {
        warn!(pipeline_id = %pipeline.id, "pipeline run cancelled by shutdown");
        let _ = self.store.update_pipeline(&pipeline.id, |p| {
            p.status = PipelineState::Failed;
            p.updated_at = Utc::now();
        });
        let _ = self.bus.broadcast_event(
            &DashboardEvent::PipelineFailed {
                pipeline_id: pipeline.id.clone(),
                error: "cancelled".into(),
            },
            Priority::Normal,
        );
    }

    async fn run(&self, pipeline: &Pipeline) {
        let started = Instant::now();
        let total = pipeline.steps.len();
        info!(pipeline_id = %pipeline.id, steps = total, "pipeline run started");

        for (index, step) in pipeline.steps.iter().enumerate() {
            let progress = step_progress(index, total);
            let still_there = self
                .store
                .update_pipeline(&pipeline.id, |p| p.progress = progress)
                .is_some();
            if !still_there {
                warn!(pipeline_id = %pipeline.id, "pipeline deleted mid-run");
                let _ = self.bus.broadcast_event(
                    &DashboardEvent::PipelineFailed {
                        pipeline_id: pipeline.id.clone(),
                        error: "pipeline was deleted".into(),
                    },
                    Priority::Normal,
                );
                return;
            }
            let _ = self.bus.broadcast_event(
                &DashboardEvent::PipelineProgress {
                    pipeline_id: pipeline.id.clone(),
                    step: step.name.clone(),
                    step_index: index,
                    total_steps: total,
                    progress,
                },
                Priority::Normal,
            );
            tokio::time::sleep(self.step_delay).await;
        }

        let duration_secs = started.elapsed().as_secs_f64();
        let _ = self.store.update_pipeline(&pipeline.id, |p| {
            p.status = PipelineState::Completed;
            p.progress = 100;
            p.updated_at = Utc::now();
        });
        info!(pipeline_id = %pipeline.id, duration_secs, "pipeline run completed");
        let _ = self.bus.broadcast_event(
            &DashboardEvent::PipelineCompleted {
                pipeline_id: pipeline.id.clone(),
                duration_secs,
            },
            Priority::Normal,
        );
        publish_activity(
            &self.store,
            &self.bus,
            Activity::new(
                ActivityKind::Pipeline,
                "Pipeline completed",
                format!("Pipeline '{}' finished {total} steps", pipeline.name),
                ActivityStatus::Success,
            ),
        );
    }
}

/// Progress reported when step `index` of `total` starts.
fn step_progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    u8::try_from(index * 100 / total).unwrap_or(100)
}

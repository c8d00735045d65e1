//! Training jobs.
//!
//! A job walks a fixed list of stages, broadcasting `training_progress` for
//! each. The model itself is a majority-class baseline fitted on one CSV
//! column: it always predicts the most frequent label, and its score is that
//! label's frequency.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pulse_core::records::{
    Activity, ActivityKind, ActivityStatus, JobStatus, ModelRecord, ModelStatus, TrainingJob,
};
use pulse_core::{DashboardEvent, JobId, ModelId, Priority};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::feed::publish_activity;
use crate::jobs::JobSupervisor;
use crate::store::DashboardStore;
use crate::websocket::broadcast::BroadcastBus;

/// Stage names with the progress reached when each starts.
pub const STAGES: &[(&str, u8)] = &[
    ("Data validation", 10),
    ("Data preprocessing", 25),
    ("Feature engineering", 40),
    ("Model selection", 55),
    ("Training model", 70),
    ("Model validation", 85),
    ("Performance evaluation", 95),
    ("Finalizing model", 98),
];

/// Why a dataset could not be trained on.
#[derive(Debug, Error)]
pub enum TrainingError {
    /// The file could not be read.
    #[error("cannot read dataset: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid CSV.
    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),
    /// Fewer than two columns.
    #[error("dataset needs at least 2 columns (features + target)")]
    TooFewColumns,
    /// The requested target column does not exist.
    #[error("target column '{0}' not found")]
    UnknownTarget(String),
    /// The file has a header but no rows.
    #[error("dataset has no rows")]
    Empty,
    /// The fitting task did not finish.
    #[error("training task aborted: {0}")]
    Aborted(String),
}

/// A fitted majority-class model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaselineModel {
    /// Columns other than the target.
    pub feature_names: Vec<String>,
    /// Column the model predicts.
    pub target_column: String,
    /// The label it always predicts.
    pub predicted_label: String,
    /// Frequency of `predicted_label` among training rows.
    pub accuracy: f64,
    /// Training rows.
    pub rows: usize,
}

impl BaselineModel {
    /// Fit on the CSV at `path`, predicting `target` (default: last column).
    pub fn fit(path: &Path, target: Option<&str>) -> Result<Self, TrainingError> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.len() < 2 {
            return Err(TrainingError::TooFewColumns);
        }
        let target_index = match target {
            Some(name) => headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| TrainingError::UnknownTarget(name.to_string()))?,
            None => headers.len() - 1,
        };

        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut rows = 0;
        for record in reader.records() {
            let record = record?;
            let label = record.get(target_index).unwrap_or_default().to_string();
            *counts.entry(label).or_default() += 1;
            rows += 1;
        }
        if rows == 0 {
            return Err(TrainingError::Empty);
        }

        let (predicted_label, hits) = counts
            .into_iter()
            .max_by(|(la, ca), (lb, cb)| ca.cmp(cb).then_with(|| lb.cmp(la)))
            .unwrap_or_default();

        let mut feature_names = headers;
        let target_column = feature_names.remove(target_index);
        Ok(Self {
            feature_names,
            target_column,
            predicted_label,
            accuracy: hits as f64 / rows as f64,
            rows,
        })
    }
}

/// Where a model's artifact is stored.
pub fn artifact_path(models_dir: &Path, id: &ModelId) -> PathBuf {
    models_dir.join(format!("{id}.json"))
}

/// Runs training jobs in the background.
pub struct Trainer {
    store: Arc<DashboardStore>,
    bus: Arc<BroadcastBus>,
    jobs: Arc<JobSupervisor>,
    models_dir: PathBuf,
    stage_delay: Duration,
}

impl Trainer {
    /// Create a trainer whose runs are owned by `jobs`.
    pub fn new(
        store: Arc<DashboardStore>,
        bus: Arc<BroadcastBus>,
        jobs: Arc<JobSupervisor>,
        models_dir: PathBuf,
        stage_delay: Duration,
    ) -> Self {
        Self {
            store,
            bus,
            jobs,
            models_dir,
            stage_delay,
        }
    }

    /// Register a pending job and start it in the background.
    pub fn submit(
        self: &Arc<Self>,
        model_type: String,
        file_path: String,
        target_column: Option<String>,
    ) -> JobId {
        let job = TrainingJob {
            id: JobId::new(),
            status: JobStatus::Pending,
            progress: 0,
            message: "Queued".into(),
            model_type,
            file_path,
            target_column,
            model_id: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let id = job.id.clone();
        self.store.insert_job(job);

        let trainer = Arc::clone(self);
        let job_id = id.clone();
        self.jobs.spawn("training", move |token| async move {
            trainer.run(job_id, token).await;
        });
        id
    }

    /// Drive one job to completion, failure, or cancellation by `token`.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn run(&self, job_id: JobId, token: CancellationToken) {
        let Some(job) = self.store.update_job(&job_id, |j| {
            j.status = JobStatus::Training;
            j.message = "Starting training".into();
        }) else {
            return;
        };
        info!(model_type = %job.model_type, file = %job.file_path, "training started");

        tokio::select! {
            biased;
            () = token.cancelled() => self.cancel(&job),
            result = self.train(&job) => match result {
                Ok(model) => self.complete(&job, model),
                Err(e) => self.fail(&job, &e),
            },
        }
    }

    async fn train(&self, job: &TrainingJob) -> Result<ModelRecord, TrainingError> {
        let mut fitted = None;
        for (index, (stage, progress)) in STAGES.iter().enumerate() {
            let _ = self.store.update_job(&job.id, |j| {
                j.progress = *progress;
                j.message = (*stage).to_string();
            });
            let _ = self.bus.broadcast_event(
                &DashboardEvent::TrainingProgress {
                    job_id: job.id.clone(),
                    progress: *progress,
                    message: format!("{stage} - {progress}% complete"),
                    stage_index: index,
                    total_stages: STAGES.len(),
                },
                Priority::Normal,
            );

            if index == 0 {
                let path = PathBuf::from(&job.file_path);
                let target = job.target_column.clone();
                let model = tokio::task::spawn_blocking(move || {
                    BaselineModel::fit(&path, target.as_deref())
                })
                .await
                .map_err(|e| TrainingError::Aborted(e.to_string()))??;
                fitted = Some(model);
            }

            tokio::time::sleep(self.stage_delay).await;
        }

        let model = fitted.ok_or_else(|| TrainingError::Aborted("no model was fitted".into()))?;
        let now = Utc::now();
        let record = ModelRecord {
            id: ModelId::new(),
            name: format!("Model {}", now.format("%Y-%m-%d %H:%M")),
            model_type: job.model_type.clone(),
            accuracy: model.accuracy,
            status: ModelStatus::Active,
            created_at: now,
            deployed_at: None,
            predictions_made: 0,
            feature_names: model.feature_names.clone(),
            target_column: model.target_column.clone(),
            predicted_label: model.predicted_label.clone(),
            training_rows: model.rows,
            last_used: None,
        };
        self.save_artifact(&record.id, &model).await?;
        Ok(record)
    }

    async fn save_artifact(&self, id: &ModelId, model: &BaselineModel) -> Result<(), TrainingError> {
        tokio::fs::create_dir_all(&self.models_dir).await?;
        let json = serde_json::to_vec_pretty(model).map_err(std::io::Error::other)?;
        tokio::fs::write(artifact_path(&self.models_dir, id), json).await?;
        Ok(())
    }

    fn complete(&self, job: &TrainingJob, model: ModelRecord) {
        let accuracy = model.accuracy;
        let model_id = model.id.clone();
        self.store.insert_model(model);
        let _ = self.store.update_job(&job.id, |j| {
            j.status = JobStatus::Completed;
            j.progress = 100;
            j.message = "Training completed successfully".into();
            j.model_id = Some(model_id.clone());
            j.completed_at = Some(Utc::now());
        });
        info!(model_id = %model_id, accuracy, "training completed");

        let _ = self.bus.broadcast_event(
            &DashboardEvent::TrainingCompleted {
                job_id: job.id.clone(),
                model_id,
                accuracy,
            },
            Priority::Normal,
        );
        publish_activity(
            &self.store,
            &self.bus,
            Activity::new(
                ActivityKind::Training,
                "Model training completed",
                format!("New model trained with {:.1}% accuracy", accuracy * 100.0),
                ActivityStatus::Success,
            ),
        );
    }

    fn cancel(&self, job: &TrainingJob) {
        warn!("training cancelled by shutdown");
        let _ = self.store.update_job(&job.id, |j| {
            j.status = JobStatus::Cancelled;
            j.message = "Training cancelled: server shutting down".into();
            j.error = Some("cancelled".into());
            j.completed_at = Some(Utc::now());
        });
        let _ = self.bus.broadcast_event(
            &DashboardEvent::TrainingFailed {
                job_id: job.id.clone(),
                error: "cancelled".into(),
            },
            Priority::Normal,
        );
    }

    fn fail(&self, job: &TrainingJob, err: &TrainingError) {
        let message = err.to_string();
        error!(error = %message, "training failed");
        let _ = self.store.update_job(&job.id, |j| {
            j.status = JobStatus::Failed;
            j.message = format!("Training failed: {message}");
            j.error = Some(message.clone());
            j.completed_at = Some(Utc::now());
        });
        let _ = self.bus.broadcast_event(
            &DashboardEvent::TrainingFailed {
                job_id: job.id.clone(),
                error: message.clone(),
            },
            Priority::Normal,
        );
        publish_activity(
            &self.store,
            &self.bus,
            Activity::new(
                ActivityKind::Training,
                "Model training failed",
                message,
                ActivityStatus::Error,
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::registry::{ConnectionRegistry, RegistryConfig};

    fn write_csv(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn trainer(models_dir: PathBuf) -> (Arc<Trainer>, Arc<DashboardStore>) {
        let (trainer, store, _jobs) = trainer_with_delay(models_dir, Duration::ZERO);
        (trainer, store)
    }

    fn trainer_with_delay(
        models_dir: PathBuf,
        stage_delay: Duration,
    ) -> (Arc<Trainer>, Arc<DashboardStore>, Arc<JobSupervisor>) {
        let store = Arc::new(DashboardStore::default());
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig::default()));
        let bus = Arc::new(BroadcastBus::new(registry));
        let jobs = Arc::new(JobSupervisor::new(&CancellationToken::new()));
        let trainer = Arc::new(Trainer::new(
            Arc::clone(&store),
            bus,
            Arc::clone(&jobs),
            models_dir,
            stage_delay,
        ));
        (trainer, store, jobs)
    }

    #[test]
    fn baseline_predicts_majority_of_last_column() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_csv(tmp.path(), "d.csv", "a,b,label\n1,2,yes\n3,4,no\n5,6,yes\n7,8,yes\n");
        let model = BaselineModel::fit(&path, None).unwrap();
        assert_eq!(model.target_column, "label");
        assert_eq!(model.feature_names, vec!["a", "b"]);
        assert_eq!(model.predicted_label, "yes");
        assert_eq!(model.rows, 4);
        assert!((model.accuracy - 0.75).abs() < 1e-9);
    }

    #[test]
    fn baseline_honours_target_column() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_csv(tmp.path(), "d.csv", "kind,x\ncat,1\ncat,2\ndog,3\n");
        let model = BaselineModel::fit(&path, Some("kind")).unwrap();
        assert_eq!(model.target_column, "kind");
        assert_eq!(model.feature_names, vec!["x"]);
        assert_eq!(model.predicted_label, "cat");
    }

    #[test]
    fn ties_pick_smallest_label() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_csv(tmp.path(), "d.csv", "x,y\n1,b\n2,a\n");
        assert_eq!(BaselineModel::fit(&path, None).unwrap().predicted_label, "a");
    }

    #[test]
    fn baseline_rejects_bad_input() {
        let tmp = tempfile::tempdir().unwrap();
        let one_col = write_csv(tmp.path(), "one.csv", "x\n1\n");
        assert!(matches!(
            BaselineModel::fit(&one_col, None),
            Err(TrainingError::TooFewColumns)
        ));
        let empty = write_csv(tmp.path(), "empty.csv", "x,y\n");
        assert!(matches!(BaselineModel::fit(&empty, None), Err(TrainingError::Empty)));
        let ok = write_csv(tmp.path(), "ok.csv", "x,y\n1,2\n");
        assert!(matches!(
            BaselineModel::fit(&ok, Some("z")),
            Err(TrainingError::UnknownTarget(_))
        ));
        assert!(matches!(
            BaselineModel::fit(&tmp.path().join("missing.csv"), None),
            Err(TrainingError::Csv(_))
        ));
    }

    #[tokio::test]
    async fn job_completes_and_registers_model() {
        let tmp = tempfile::tempdir().unwrap();
        let csv = write_csv(tmp.path(), "d.csv", "f,t\n1,a\n2,a\n3,b\n");
        let (trainer, store) = trainer(tmp.path().join("models"));

        let job_id = trainer.submit("baseline".into(), csv.display().to_string(), None);
        let job = wait_finished(&store, &job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        let model_id = job.model_id.unwrap();
        let model = store.model(&model_id).unwrap();
        assert_eq!(model.predicted_label, "a");
        assert!(artifact_path(&tmp.path().join("models"), &model_id).exists());
        assert_eq!(store.recent_activity(1)[0].status, ActivityStatus::Success);
    }

    #[tokio::test]
    async fn job_failure_is_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let csv = write_csv(tmp.path(), "bad.csv", "only\n1\n");
        let (trainer, store) = trainer(tmp.path().join("models"));

        let job_id = trainer.submit("baseline".into(), csv.display().to_string(), None);
        let job = wait_finished(&store, &job_id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("at least 2 columns"));
        assert_eq!(store.model_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_a_running_job() {
        let tmp = tempfile::tempdir().unwrap();
        let csv = write_csv(tmp.path(), "d.csv", "f,t\n1,a\n2,b\n");
        let (trainer, store, jobs) =
            trainer_with_delay(tmp.path().join("models"), Duration::from_secs(60));

        let job_id = trainer.submit("baseline".into(), csv.display().to_string(), None);
        for _ in 0..200 {
            if store.job(&job_id).is_some_and(|j| j.progress >= 10) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(jobs.active(), 1);

        assert!(jobs.shutdown(Duration::from_secs(2)).await);
        let job = store.job(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.completed_at.is_some());
        assert_eq!(store.model_count(), 0);
        assert_eq!(jobs.active(), 0);
    }

    async fn wait_finished(store: &DashboardStore, id: &JobId) -> TrainingJob {
        for _ in 0..200 {
            if let Some(job) = store.job(id).filter(|j| j.status.is_finished()) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job did not finish");
    }
}

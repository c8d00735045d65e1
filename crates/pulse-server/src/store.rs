//! In-memory dashboard state.
//!
//! Each collection has its own `parking_lot::RwLock`. Nothing is persisted.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use pulse_core::records::{
    Activity, Alert, Dataset, JobStatus, ModelRecord, ModelStatus, Pipeline, TrainingJob,
};
use pulse_core::{AlertId, DatasetId, JobId, ModelId, PipelineId};
use pulse_settings::DashboardSettings;
use tokio::time::Instant;

/// Activity entries retained.
pub const ACTIVITY_CAPACITY: usize = 50;
/// Alerts retained.
pub const ALERT_CAPACITY: usize = 100;
/// Width of the predictions-per-minute window.
const PREDICTION_WINDOW: Duration = Duration::from_secs(60);

/// Sliding window of prediction timestamps.
#[derive(Debug, Default)]
pub struct PredictionWindow {
    stamps: VecDeque<Instant>,
}

impl PredictionWindow {
    /// Record one prediction at `now`.
    pub fn record(&mut self, now: Instant) {
        self.evict(now);
        self.stamps.push_back(now);
    }

    /// Predictions within the last minute.
    pub fn per_minute(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.stamps.len()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.stamps.front() {
            if now.saturating_duration_since(*front) >= PREDICTION_WINDOW {
                let _ = self.stamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Progress of the most recently updated running training job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrainingSnapshot {
    /// Progress percent.
    pub progress: u8,
    /// Stage message.
    pub message: String,
}

/// Process-local store for every dashboard collection.
#[derive(Default)]
pub struct DashboardStore {
    models: RwLock<HashMap<ModelId, ModelRecord>>,
    jobs: RwLock<HashMap<JobId, TrainingJob>>,
    pipelines: RwLock<HashMap<PipelineId, Pipeline>>,
    datasets: RwLock<HashMap<DatasetId, Dataset>>,
    alerts: RwLock<VecDeque<Alert>>,
    activity: RwLock<VecDeque<Activity>>,
    settings: RwLock<DashboardSettings>,
    predictions: Mutex<PredictionWindow>,
}

impl DashboardStore {
    /// Create a store with the given user settings.
    pub fn new(settings: DashboardSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            ..Self::default()
        }
    }

    // ── Models ──

    /// Insert or replace a model.
    pub fn insert_model(&self, model: ModelRecord) {
        let _ = self.models.write().insert(model.id.clone(), model);
    }

    /// Look up a model.
    pub fn model(&self, id: &ModelId) -> Option<ModelRecord> {
        self.models.read().get(id).cloned()
    }

    /// All models, newest first.
    pub fn models(&self) -> Vec<ModelRecord> {
        let mut models: Vec<_> = self.models.read().values().cloned().collect();
        models.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        models
    }

    /// Apply `f` to a model and return the updated copy.
    pub fn update_model(
        &self,
        id: &ModelId,
        f: impl FnOnce(&mut ModelRecord),
    ) -> Option<ModelRecord> {
        let mut models = self.models.write();
        let model = models.get_mut(id)?;
        f(model);
        Some(model.clone())
    }

    /// Apply `f` to every model and return the updated copies.
    pub fn update_all_models(&self, mut f: impl FnMut(&mut ModelRecord)) -> Vec<ModelRecord> {
        let mut models = self.models.write();
        models
            .values_mut()
            .map(|m| {
                f(m);
                m.clone()
            })
            .collect()
    }

    /// Remove a model.
    pub fn remove_model(&self, id: &ModelId) -> Option<ModelRecord> {
        self.models.write().remove(id)
    }

    /// Remove every model matching `pred` and return them.
    pub fn remove_models_where(&self, pred: impl Fn(&ModelRecord) -> bool) -> Vec<ModelRecord> {
        let mut models = self.models.write();
        let doomed: Vec<ModelId> = models
            .values()
            .filter(|m| pred(m))
            .map(|m| m.id.clone())
            .collect();
        doomed.iter().filter_map(|id| models.remove(id)).collect()
    }

    /// Number of models.
    pub fn model_count(&self) -> usize {
        self.models.read().len()
    }

    /// Number of models with the given status.
    pub fn model_count_by_status(&self, status: ModelStatus) -> usize {
        self.models.read().values().filter(|m| m.status == status).count()
    }

    /// Sum of `predictions_made` across models.
    pub fn total_predictions(&self) -> u64 {
        self.models.read().values().map(|m| m.predictions_made).sum()
    }

    // ── Training jobs ──

    /// Insert or replace a job.
    pub fn insert_job(&self, job: TrainingJob) {
        let _ = self.jobs.write().insert(job.id.clone(), job);
    }

    /// Look up a job.
    pub fn job(&self, id: &JobId) -> Option<TrainingJob> {
        self.jobs.read().get(id).cloned()
    }

    /// Apply `f` to a job and return the updated copy.
    pub fn update_job(&self, id: &JobId, f: impl FnOnce(&mut TrainingJob)) -> Option<TrainingJob> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(id)?;
        f(job);
        Some(job.clone())
    }

    /// Jobs currently in the training state.
    pub fn active_training_jobs(&self) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|j| j.status == JobStatus::Training)
            .count()
    }

    /// Progress of the newest running job, if any.
    pub fn current_training(&self) -> Option<TrainingSnapshot> {
        self.jobs
            .read()
            .values()
            .filter(|j| j.status == JobStatus::Training)
            .max_by_key(|j| j.created_at)
            .map(|j| TrainingSnapshot {
                progress: j.progress,
                message: j.message.clone(),
            })
    }

    // ── Pipelines ──

    /// Insert or replace a pipeline.
    pub fn insert_pipeline(&self, pipeline: Pipeline) {
        let _ = self.pipelines.write().insert(pipeline.id.clone(), pipeline);
    }

    /// Look up a pipeline.
    pub fn pipeline(&self, id: &PipelineId) -> Option<Pipeline> {
        self.pipelines.read().get(id).cloned()
    }

    /// All pipelines, newest first.
    pub fn pipelines(&self) -> Vec<Pipeline> {
        let mut pipelines: Vec<_> = self.pipelines.read().values().cloned().collect();
        pipelines.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        pipelines
    }

    /// Apply `f` to a pipeline and return the updated copy.
    pub fn update_pipeline(
        &self,
        id: &PipelineId,
        f: impl FnOnce(&mut Pipeline),
    ) -> Option<Pipeline> {
        let mut pipelines = self.pipelines.write();
        let pipeline = pipelines.get_mut(id)?;
        f(pipeline);
        Some(pipeline.clone())
    }

    /// Remove a pipeline.
    pub fn remove_pipeline(&self, id: &PipelineId) -> Option<Pipeline> {
        self.pipelines.write().remove(id)
    }

    // ── Datasets ──

    /// Insert or replace a dataset.
    pub fn insert_dataset(&self, dataset: Dataset) {
        let _ = self.datasets.write().insert(dataset.id.clone(), dataset);
    }

    /// Look up a dataset.
    pub fn dataset(&self, id: &DatasetId) -> Option<Dataset> {
        self.datasets.read().get(id).cloned()
    }

    /// All datasets, newest first.
    pub fn datasets(&self) -> Vec<Dataset> {
        let mut datasets: Vec<_> = self.datasets.read().values().cloned().collect();
        datasets.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        datasets
    }

    /// Remove a dataset.
    pub fn remove_dataset(&self, id: &DatasetId) -> Option<Dataset> {
        self.datasets.write().remove(id)
    }

    // ── Alerts ──

    /// Record an alert, dropping the oldest past capacity.
    pub fn push_alert(&self, alert: Alert) {
        let mut alerts = self.alerts.write();
        alerts.push_front(alert);
        alerts.truncate(ALERT_CAPACITY);
    }

    /// All alerts, newest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().iter().cloned().collect()
    }

    /// Mark an alert acknowledged and return it.
    pub fn acknowledge_alert(&self, id: &AlertId, by: &str) -> Option<Alert> {
        let mut alerts = self.alerts.write();
        let alert = alerts.iter_mut().find(|a| &a.id == id)?;
        alert.acknowledged = true;
        alert.acknowledged_by = Some(by.to_string());
        alert.acknowledged_at = Some(chrono::Utc::now());
        Some(alert.clone())
    }

    // ── Activity ──

    /// Record an activity entry, dropping the oldest past capacity.
    pub fn push_activity(&self, activity: Activity) {
        let mut log = self.activity.write();
        log.push_front(activity);
        log.truncate(ACTIVITY_CAPACITY);
    }

    /// The `limit` most recent entries, newest first.
    pub fn recent_activity(&self, limit: usize) -> Vec<Activity> {
        self.activity.read().iter().take(limit).cloned().collect()
    }

    // ── Settings ──

    /// Current user settings.
    pub fn settings(&self) -> DashboardSettings {
        self.settings.read().clone()
    }

    /// Replace the user settings.
    pub fn replace_settings(&self, settings: DashboardSettings) {
        *self.settings.write() = settings;
    }

    // ── Predictions ──

    /// Record one served prediction.
    pub fn record_prediction(&self) {
        self.predictions.lock().record(Instant::now());
    }

    /// Predictions served within the last minute.
    pub fn predictions_per_minute(&self) -> usize {
        self.predictions.lock().per_minute(Instant::now())
    }
}

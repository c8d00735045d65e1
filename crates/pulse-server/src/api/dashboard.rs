//! Dashboard overview: activity feed, status summary, user settings.

use std::time::Duration;

use axum::Json;
use axum::extract::State;
use pulse_core::records::{Activity, ActivityKind, ActivityStatus, ModelStatus};
use pulse_settings::DashboardSettings;
use serde_json::{Value, json};

use crate::feed::publish_activity;
use crate::server::AppState;

/// Entries returned by the activity endpoint.
const ACTIVITY_LIMIT: usize = 10;
/// How long the prediction rate is memoized.
const PREDICTION_RATE_TTL: Duration = Duration::from_secs(5);
const PREDICTION_RATE_KEY: &str = "status:predictions_per_minute";

/// GET /api/activity
pub async fn activity(State(state): State<AppState>) -> Json<Vec<Activity>> {
    Json(state.store.recent_activity(ACTIVITY_LIMIT))
}

/// GET /api/status
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let store = &state.store;
    let active_training_jobs = store.active_training_jobs();
    let predictions_per_minute =
        state
            .cache
            .get_or_insert_with(PREDICTION_RATE_KEY, Some(PREDICTION_RATE_TTL), || {
                Value::from(store.predictions_per_minute())
            });
    let system_health = if active_training_jobs < state.config.busy_threshold {
        "healthy"
    } else {
        "busy"
    };

    Json(json!({
        "total_models": store.model_count(),
        "active_models": store.model_count_by_status(ModelStatus::Active),
        "deployed_models": store.model_count_by_status(ModelStatus::Deployed),
        "total_predictions": store.total_predictions(),
        "active_training_jobs": active_training_jobs,
        "system_health": system_health,
        "host_health": state.sampler.health(),
        "predictions_per_minute": predictions_per_minute,
        "connections": state.registry.len(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// GET /api/settings
pub async fn get_settings(State(state): State<AppState>) -> Json<DashboardSettings> {
    Json(state.store.settings())
}

/// POST /api/settings
pub async fn save_settings(
    State(state): State<AppState>,
    Json(settings): Json<DashboardSettings>,
) -> Json<Value> {
    state.store.replace_settings(settings);
    publish_activity(
        &state.store,
        &state.bus,
        Activity::new(
            ActivityKind::System,
            "Settings updated",
            "System configuration has been updated",
            ActivityStatus::Success,
        ),
    );
    Json(json!({ "message": "Settings saved successfully" }))
}

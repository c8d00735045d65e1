//! Per-component health, derived from live server state.

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use pulse_core::records::ModelStatus;
use serde::Serialize;
use serde_json::{Value, json};

use super::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Component health verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    /// Operating normally.
    Healthy,
    /// Saturated or close to a limit.
    Degraded,
}

/// Health of one server component.
#[derive(Clone, Debug, Serialize)]
pub struct ComponentHealth {
    /// Component name.
    pub name: &'static str,
    /// Verdict.
    pub status: ComponentState,
    /// When the check ran.
    pub last_check: DateTime<Utc>,
    /// Component-specific counters.
    pub metrics: Value,
}

fn verdict(degraded: bool) -> ComponentState {
    if degraded {
        ComponentState::Degraded
    } else {
        ComponentState::Healthy
    }
}

/// Check every component.
pub fn check_components(state: &AppState) -> Vec<ComponentHealth> {
    let now = Utc::now();
    let store = &state.store;
    let connections = state.registry.stats();
    let training = store.active_training_jobs();

    vec![
        ComponentHealth {
            name: "model_service",
            status: ComponentState::Healthy,
            last_check: now,
            metrics: json!({
                "total_models": store.model_count(),
                "deployed_models": store.model_count_by_status(ModelStatus::Deployed),
                "predictions_per_minute": store.predictions_per_minute(),
            }),
        },
        ComponentHealth {
            name: "data_processor",
            status: verdict(training >= state.config.busy_threshold),
            last_check: now,
            metrics: json!({
                "datasets": store.datasets().len(),
                "active_training_jobs": training,
                "running_jobs": state.jobs.active(),
            }),
        },
        ComponentHealth {
            name: "websocket_server",
            status: verdict(connections.total >= connections.max),
            last_check: now,
            metrics: json!({
                "active_connections": connections.active,
                "total_connections": connections.total,
                "max_connections": connections.max,
            }),
        },
    ]
}

/// GET /api/components/health
pub async fn all(State(state): State<AppState>) -> Json<Value> {
    let components = check_components(&state);
    let overall = if components.iter().all(|c| c.status == ComponentState::Healthy) {
        "healthy"
    } else {
        "degraded"
    };
    Json(json!({ "components": components, "overall_health": overall }))
}

/// GET /api/components/{name}/health
pub async fn one(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<ComponentHealth>> {
    check_components(&state)
        .into_iter()
        .find(|c| c.name == name)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Component not found"))
}

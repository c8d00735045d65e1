//! Pipeline CRUD and runs.

use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use pulse_core::records::{Activity, ActivityKind, ActivityStatus, Pipeline, PipelineState, PipelineStep};
use pulse_core::{DashboardEvent, PipelineId, Priority};
use serde::Deserialize;
use serde_json::{Value, json};

use super::error::{ApiError, ApiResult};
use crate::feed::publish_activity;
use crate::pipelines::PipelineError;
use crate::server::AppState;

/// Create/update body.
#[derive(Debug, Deserialize)]
pub struct PipelineBody {
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Ordered steps.
    #[serde(default)]
    pub steps: Vec<PipelineStep>,
}

impl PipelineBody {
    fn validate(&self) -> ApiResult<()> {
        if self.name.trim().is_empty() {
            return Err(ApiError::bad_request("pipeline name must not be empty"));
        }
        Ok(())
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::NotFound => Self::not_found("Pipeline not found"),
            PipelineError::AlreadyRunning | PipelineError::NoSteps => Self::bad_request(e.to_string()),
        }
    }
}

fn not_found() -> ApiError {
    ApiError::not_found("Pipeline not found")
}

fn announce(state: &AppState, pipeline: &Pipeline, message: &str) {
    let _ = state.bus.broadcast_event(
        &DashboardEvent::PipelineStatus {
            pipeline_id: pipeline.id.clone(),
            status: pipeline.status,
            message: message.to_string(),
        },
        Priority::Normal,
    );
}

fn log(state: &AppState, title: &str, description: String, status: ActivityStatus) {
    publish_activity(
        &state.store,
        &state.bus,
        Activity::new(ActivityKind::Pipeline, title, description, status),
    );
}

/// GET /api/pipelines
pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let pipelines = state.store.pipelines();
    Json(json!({ "total": pipelines.len(), "pipelines": pipelines }))
}

/// POST /api/pipelines
pub async fn create(State(state): State<AppState>, Json(body): Json<PipelineBody>) -> ApiResult<Json<Pipeline>> {
    body.validate()?;
    let now = Utc::now();
    let pipeline = Pipeline {
        id: PipelineId::new(),
        name: body.name,
        description: body.description,
        steps: body.steps,
        status: PipelineState::Draft,
        progress: 0,
        run_count: 0,
        created_at: now,
        updated_at: now,
        last_run: None,
    };
    state.store.insert_pipeline(pipeline.clone());
    announce(&state, &pipeline, "created");
    log(
        &state,
        "Pipeline created",
        format!("New pipeline '{}' has been created", pipeline.name),
        ActivityStatus::Success,
    );
    Ok(Json(pipeline))
}

/// GET /api/pipelines/{id}
pub async fn get(State(state): State<AppState>, Path(id): Path<PipelineId>) -> ApiResult<Json<Pipeline>> {
    state.store.pipeline(&id).map(Json).ok_or_else(not_found)
}

/// PUT /api/pipelines/{id}
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<PipelineId>,
    Json(body): Json<PipelineBody>,
) -> ApiResult<Json<Pipeline>> {
    body.validate()?;
    let current = state.store.pipeline(&id).ok_or_else(not_found)?;
    if current.status == PipelineState::Running {
        return Err(ApiError::bad_request("cannot edit a running pipeline"));
    }
    let pipeline = state
        .store
        .update_pipeline(&id, |p| {
            p.name = body.name;
            p.description = body.description;
            p.steps = body.steps;
            p.updated_at = Utc::now();
        })
        .ok_or_else(not_found)?;
    announce(&state, &pipeline, "updated");
    log(
        &state,
        "Pipeline updated",
        format!("Pipeline '{}' has been updated", pipeline.name),
        ActivityStatus::Info,
    );
    Ok(Json(pipeline))
}

/// DELETE /api/pipelines/{id}
pub async fn delete(State(state): State<AppState>, Path(id): Path<PipelineId>) -> ApiResult<Json<Value>> {
    let pipeline = state.store.remove_pipeline(&id).ok_or_else(not_found)?;
    announce(&state, &pipeline, "deleted");
    log(
        &state,
        "Pipeline deleted",
        format!("Pipeline '{}' has been deleted", pipeline.name),
        ActivityStatus::Warning,
    );
    Ok(Json(json!({ "message": "Pipeline deleted successfully" })))
}

/// POST /api/pipelines/{id}/run
pub async fn run(State(state): State<AppState>, Path(id): Path<PipelineId>) -> ApiResult<Json<Value>> {
    let pipeline = state.pipelines.start(&id)?;
    Ok(Json(json!({
        "message": "Pipeline execution started",
        "pipeline_id": pipeline.id,
        "status": pipeline.status,
    })))
}

/// GET /api/pipelines/{id}/status
pub async fn status(State(state): State<AppState>, Path(id): Path<PipelineId>) -> ApiResult<Json<Value>> {
    let pipeline = state.store.pipeline(&id).ok_or_else(not_found)?;
    Ok(Json(json!({
        "pipeline_id": pipeline.id,
        "status": pipeline.status,
        "progress": pipeline.progress,
        "run_count": pipeline.run_count,
        "last_run": pipeline.last_run,
        "updated_at": pipeline.updated_at,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{call, test_server};
    use axum::http::StatusCode;
    use std::time::Duration;

    fn body(steps: usize) -> Value {
        let steps: Vec<Value> = (0..steps)
            .map(|i| json!({ "name": format!("step {i}"), "type": "transform" }))
            .collect();
        json!({ "name": "nightly", "description": "retrain", "steps": steps })
    }

    #[tokio::test]
    async fn crud_round() {
        let app = test_server().router();
        let (status, created) = call(&app, "POST", "/api/pipelines", Some(body(2))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["status"], "draft");
        assert_eq!(created["steps"][0]["type"], "transform");
        let id = created["id"].as_str().unwrap().to_string();

        let (_, listed) = call(&app, "GET", "/api/pipelines", None).await;
        assert_eq!(listed["total"], 1);

        let mut edited = body(3);
        edited["name"] = json!("weekly");
        let (status, updated) = call(&app, "PUT", &format!("/api/pipelines/{id}"), Some(edited)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["name"], "weekly");
        assert_eq!(updated["steps"].as_array().unwrap().len(), 3);

        let (status, _) = call(&app, "DELETE", &format!("/api/pipelines/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "GET", &format!("/api/pipelines/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let app = test_server().router();
        let (status, _) = call(&app, "POST", "/api/pipelines", Some(json!({ "name": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn run_completes_and_reports_status() {
        let app = test_server().router();
        let (_, created) = call(&app, "POST", "/api/pipelines", Some(body(2))).await;
        let id = created["id"].as_str().unwrap().to_string();

        let (status, started) = call(&app, "POST", &format!("/api/pipelines/{id}/run"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started["status"], "running");

        let mut last = Value::Null;
        for _ in 0..200 {
            let (_, s) = call(&app, "GET", &format!("/api/pipelines/{id}/status"), None).await;
            if s["status"] == "completed" {
                last = s;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(last["progress"], 100);
        assert_eq!(last["run_count"], 1);
    }

    #[tokio::test]
    async fn run_without_steps_is_bad_request() {
        let app = test_server().router();
        let (_, created) = call(&app, "POST", "/api/pipelines", Some(body(0))).await;
        let id = created["id"].as_str().unwrap().to_string();
        let (status, body) = call(&app, "POST", &format!("/api/pipelines/{id}/run"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "pipeline has no steps");
        let (status, _) = call(&app, "POST", "/api/pipelines/missing/run", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

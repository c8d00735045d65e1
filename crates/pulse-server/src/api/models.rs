//! Training and model endpoints.

use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use pulse_core::records::{Activity, ActivityKind, ActivityStatus, ModelRecord, ModelStatus, TrainingJob};
use pulse_core::{DashboardEvent, JobId, ModelId, Priority};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::error::{ApiError, ApiResult};
use crate::feed::publish_activity;
use crate::server::AppState;
use crate::training::artifact_path;

/// POST /api/train body.
#[derive(Debug, Deserialize)]
pub struct TrainRequest {
    /// Requested model family.
    #[serde(default = "default_model_type")]
    pub model_type: String,
    /// Column to predict; defaults to the last one.
    #[serde(default)]
    pub target_column: Option<String>,
    /// CSV returned by an upload.
    pub file_path: String,
}

fn default_model_type() -> String {
    "automatic".into()
}

/// POST /api/train
pub async fn train(State(state): State<AppState>, Json(req): Json<TrainRequest>) -> ApiResult<Json<Value>> {
    match tokio::fs::metadata(&req.file_path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Err(ApiError::bad_request(format!("file not found: {}", req.file_path))),
    }
    let job_id = state
        .trainer
        .submit(req.model_type, req.file_path, req.target_column);
    Ok(Json(json!({ "job_id": job_id, "message": "Training started" })))
}

/// GET /api/training/{job_id}
pub async fn training_status(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> ApiResult<Json<TrainingJob>> {
    state
        .store
        .job(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Training job not found"))
}

/// GET /api/models
pub async fn list(State(state): State<AppState>) -> Json<Vec<ModelRecord>> {
    Json(state.store.models())
}

/// GET /api/models/{id}
pub async fn get(State(state): State<AppState>, Path(id): Path<ModelId>) -> ApiResult<Json<ModelRecord>> {
    state
        .store
        .model(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Model not found"))
}

/// DELETE /api/models/{id}
pub async fn delete(State(state): State<AppState>, Path(id): Path<ModelId>) -> ApiResult<Json<Value>> {
    let model = state
        .store
        .remove_model(&id)
        .ok_or_else(|| ApiError::not_found("Model not found"))?;
    let artifact = artifact_path(&state.config.models_dir, &id);
    if let Err(e) = tokio::fs::remove_file(&artifact).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %artifact.display(), error = %e, "failed to remove model artifact");
        }
    }
    info!(model_id = %id, "model deleted");
    publish_activity(
        &state.store,
        &state.bus,
        Activity::new(
            ActivityKind::Deployment,
            "Model deleted",
            format!("Model {} removed from system", model.name),
            ActivityStatus::Warning,
        ),
    );
    Ok(Json(json!({ "message": "Model deleted successfully" })))
}

/// POST /api/models/{id}/predict
///
/// The body maps feature names to values; every feature the model was
/// trained on must be present.
pub async fn predict(
    State(state): State<AppState>,
    Path(id): Path<ModelId>,
    Json(features): Json<Map<String, Value>>,
) -> ApiResult<Json<Value>> {
    let model = state
        .store
        .model(&id)
        .ok_or_else(|| ApiError::not_found("Model not found"))?;

    let missing: Vec<&str> = model
        .feature_names
        .iter()
        .filter(|f| !features.contains_key(f.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::bad_request(format!(
            "missing features: {}",
            missing.join(", ")
        )));
    }

    let _ = state.store.update_model(&id, |m| {
        m.predictions_made += 1;
        m.last_used = Some(Utc::now());
    });
    state.store.record_prediction();

    Ok(Json(json!({
        "prediction": model.predicted_label,
        "confidence": model.accuracy,
        "model_id": id,
        "timestamp": Utc::now(),
    })))
}

/// POST /api/models/{id}/deploy
pub async fn deploy(State(state): State<AppState>, Path(id): Path<ModelId>) -> ApiResult<Json<Value>> {
    let model = state
        .store
        .update_model(&id, |m| {
            let now = Utc::now();
            m.status = ModelStatus::Deployed;
            m.deployed_at = Some(now);
            m.last_used = Some(now);
        })
        .ok_or_else(|| ApiError::not_found("Model not found"))?;
    info!(model_id = %id, "model deployed");

    let _ = state.bus.broadcast_event(
        &DashboardEvent::ModelDeployed {
            model_id: model.id.clone(),
            name: model.name.clone(),
        },
        Priority::Normal,
    );
    publish_activity(
        &state.store,
        &state.bus,
        Activity::new(
            ActivityKind::Deployment,
            "Model deployed",
            format!("Model {} is now live", model.name),
            ActivityStatus::Success,
        ),
    );
    Ok(Json(json!({ "message": "Model deployed successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{call, test_server, upload};
    use axum::http::StatusCode;
    use pulse_core::records::JobStatus;
    use std::time::Duration;

    const DATA: &str = "x,y,label\n1,2,a\n3,4,b\n5,6,a\n";

    fn seeded_model() -> ModelRecord {
        ModelRecord {
            id: ModelId::new(),
            name: "Model A".into(),
            model_type: "automatic".into(),
            accuracy: 0.75,
            status: ModelStatus::Active,
            created_at: Utc::now(),
            deployed_at: None,
            predictions_made: 0,
            feature_names: vec!["x".into(), "y".into()],
            target_column: "label".into(),
            predicted_label: "a".into(),
            training_rows: 4,
            last_used: None,
        }
    }

    #[tokio::test]
    async fn train_end_to_end() {
        let server = test_server();
        let app = server.router();
        let (_, up) = upload(&app, "train.csv", DATA).await;
        let file_path = up["file_path"].as_str().unwrap();

        let (status, body) = call(
            &app,
            "POST",
            "/api/train",
            Some(json!({ "file_path": file_path, "model_type": "random_forest" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Training started");
        let job_id = body["job_id"].as_str().unwrap().to_string();

        let mut job = Value::Null;
        for _ in 0..200 {
            let (_, j) = call(&app, "GET", &format!("/api/training/{job_id}"), None).await;
            if j["status"] == "completed" || j["status"] == "failed" {
                job = j;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(job["status"], "completed", "{job}");
        assert_eq!(
            server.state().store.job(&JobId::from(job_id.as_str())).unwrap().status,
            JobStatus::Completed
        );

        let (_, models) = call(&app, "GET", "/api/models", None).await;
        let models = models.as_array().unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0]["predicted_label"], "a");
        assert_eq!(models[0]["model_type"], "random_forest");
    }

    #[tokio::test]
    async fn train_rejects_missing_file() {
        let app = test_server().router();
        let (status, body) = call(
            &app,
            "POST",
            "/api/train",
            Some(json!({ "file_path": "/nonexistent/data.csv" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("file not found"));
    }

    #[tokio::test]
    async fn unknown_job_and_model_are_404() {
        let app = test_server().router();
        let (status, body) = call(&app, "GET", "/api/training/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Training job not found");
        let (status, _) = call(&app, "POST", "/api/models/nope/deploy", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn predict_counts_and_validates_features() {
        let server = test_server();
        let app = server.router();
        let model = seeded_model();
        let id = model.id.clone();
        server.state().store.insert_model(model);

        let uri = format!("/api/models/{id}/predict");
        let (status, body) = call(&app, "POST", &uri, Some(json!({ "x": 1, "y": 2 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["prediction"], "a");
        assert_eq!(body["model_id"], id.as_str());

        let (status, body) = call(&app, "POST", &uri, Some(json!({ "x": 1 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "missing features: y");

        let state = server.state();
        let stored = state.store.model(&id).unwrap();
        assert_eq!(stored.predictions_made, 1);
        assert!(stored.last_used.is_some());
        assert_eq!(state.store.predictions_per_minute(), 1);
    }

    #[tokio::test]
    async fn deploy_then_delete() {
        let server = test_server();
        let app = server.router();
        let model = seeded_model();
        let id = model.id.clone();
        server.state().store.insert_model(model);

        let (status, _) = call(&app, "POST", &format!("/api/models/{id}/deploy"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, got) = call(&app, "GET", &format!("/api/models/{id}"), None).await;
        assert_eq!(got["status"], "deployed");
        assert!(got["deployed_at"].is_string());
        assert_eq!(got["last_used"], got["deployed_at"]);

        let (status, body) = call(&app, "DELETE", &format!("/api/models/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Model deleted successfully");
        assert!(server.state().store.model(&id).is_none());
        assert_eq!(server.state().store.recent_activity(1)[0].title, "Model deleted");
    }
}

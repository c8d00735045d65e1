//! Monitoring endpoints: alerts, services, performance and runtime introspection.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::Utc;
use pulse_core::{AlertId, SystemMetrics};
use pulse_core::records::{Activity, ActivityKind, ActivityStatus, Alert, ModelStatus};
use pulse_runtime::cache::CacheInfo;
use pulse_runtime::{DirectoryUsage, TaskStatus, directory_usage};
use serde::Deserialize;
use serde_json::{Value, json};

use super::error::{ApiError, ApiResult};
use crate::feed::publish_activity;
use crate::server::AppState;

/// GET /api/monitoring/alerts
pub async fn alerts(State(state): State<AppState>) -> Json<Value> {
    let alerts = state.store.alerts();
    let unacknowledged = alerts.iter().filter(|a| !a.acknowledged).count();
    Json(json!({
        "total": alerts.len(),
        "unacknowledged": unacknowledged,
        "alerts": alerts,
    }))
}

/// Query for the acknowledge endpoint.
#[derive(Debug, Deserialize)]
pub struct AcknowledgeQuery {
    /// Who acknowledged (default `system`).
    pub acknowledged_by: Option<String>,
}

/// POST /api/monitoring/alerts/{id}/acknowledge
pub async fn acknowledge(
    State(state): State<AppState>,
    Path(id): Path<AlertId>,
    Query(query): Query<AcknowledgeQuery>,
) -> ApiResult<Json<Alert>> {
    let by = query.acknowledged_by.unwrap_or_else(|| "system".into());
    let alert = state
        .store
        .acknowledge_alert(&id, &by)
        .ok_or_else(|| ApiError::not_found("Alert not found"))?;
    publish_activity(
        &state.store,
        &state.bus,
        Activity::new(
            ActivityKind::Monitoring,
            "Alert acknowledged",
            format!("Alert '{}' has been acknowledged", alert.message),
            ActivityStatus::Info,
        ),
    );
    Ok(Json(alert))
}

/// GET /api/monitoring/services
pub async fn services(State(state): State<AppState>) -> Json<Value> {
    let store = &state.store;
    let training = store.active_training_jobs();
    let tasks = state.scheduler.status();
    let running_tasks = tasks.values().filter(|t| t.is_running).count();
    let processor = if training >= state.config.busy_threshold {
        "busy"
    } else {
        "running"
    };
    let scheduler = if state.shutdown.is_shutting_down() {
        "stopping"
    } else {
        "running"
    };
    Json(json!({
        "services": [
            {
                "name": "API Server",
                "status": "running",
                "uptime_secs": state.start_time.elapsed().as_secs(),
                "connections": state.registry.len(),
            },
            {
                "name": "Model Service",
                "status": "running",
                "deployed_models": store.model_count_by_status(ModelStatus::Deployed),
                "predictions_per_minute": store.predictions_per_minute(),
            },
            {
                "name": "Data Processor",
                "status": processor,
                "queue_size": state.jobs.active(),
                "active_training_jobs": training,
            },
            {
                "name": "Task Scheduler",
                "status": scheduler,
                "registered_tasks": tasks.len(),
                "running_tasks": running_tasks,
            },
        ],
        "timestamp": Utc::now(),
    }))
}

/// GET /api/monitoring/metrics
///
/// One host reading plus the space used by uploads and model artifacts.
pub async fn performance(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let sampler = std::sync::Arc::clone(&state.sampler);
    let uploads_dir = state.config.uploads_dir.clone();
    let models_dir = state.config.models_dir.clone();
    let (metrics, uploads, models) = tokio::task::spawn_blocking(
        move || -> std::io::Result<(SystemMetrics, DirectoryUsage, DirectoryUsage)> {
            Ok((
                sampler.sample(),
                directory_usage(&uploads_dir)?,
                directory_usage(&models_dir)?,
            ))
        },
    )
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(json!({
        "cpu_usage": metrics.cpu_percent,
        "memory_usage": metrics.memory_percent,
        "disk_usage": metrics.disk_percent,
        "network_io": {
            "bytes_sent": metrics.network_bytes_sent,
            "bytes_recv": metrics.network_bytes_recv,
        },
        "storage": {
            "uploads": uploads,
            "models": models,
        },
        "timestamp": metrics.timestamp,
    })))
}

/// GET /api/monitoring/connections
pub async fn connections(State(state): State<AppState>) -> Json<Value> {
    let registry = &state.registry;
    let clients: Vec<_> = registry.snapshot().iter().map(|c| c.info()).collect();
    Json(json!({
        "stats": registry.stats(),
        "connections": clients,
    }))
}

/// Query for the cache endpoint.
#[derive(Debug, Deserialize)]
pub struct CacheQuery {
    /// Include per-entry detail.
    #[serde(default)]
    pub keys: bool,
}

/// GET /api/monitoring/cache
pub async fn cache(State(state): State<AppState>, Query(query): Query<CacheQuery>) -> Json<CacheInfo> {
    Json(state.cache.info(query.keys))
}

/// GET /api/monitoring/tasks
pub async fn tasks(State(state): State<AppState>) -> Json<BTreeMap<String, TaskStatus>> {
    Json(state.scheduler.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{call, test_server};
    use axum::http::StatusCode;
    use chrono::Utc;
    use pulse_core::records::AlertSeverity;

    fn alert() -> Alert {
        Alert {
            id: AlertId::new(),
            title: "System health is warning".into(),
            message: "CPU 85.0%".into(),
            severity: AlertSeverity::Warning,
            source: "metrics".into(),
            created_at: Utc::now(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
        }
    }

    #[tokio::test]
    async fn acknowledge_flow() {
        let server = test_server();
        let app = server.router();
        let a = alert();
        let id = a.id.clone();
        server.state().store.push_alert(a);
        server.state().store.push_alert(alert());

        let (_, body) = call(&app, "GET", "/api/monitoring/alerts", None).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["unacknowledged"], 2);

        let uri = format!("/api/monitoring/alerts/{id}/acknowledge?acknowledged_by=oncall");
        let (status, acked) = call(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(acked["acknowledged"], true);
        assert_eq!(acked["acknowledged_by"], "oncall");

        let (_, body) = call(&app, "GET", "/api/monitoring/alerts", None).await;
        assert_eq!(body["unacknowledged"], 1);

        let (status, _) = call(&app, "POST", "/api/monitoring/alerts/nope/acknowledge", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn performance_reports_host_and_storage() {
        let server = test_server();
        let app = server.router();
        let (_, up) = crate::testing::upload(&app, "data.csv", "a,b\n1,2\n").await;
        assert!(up["file_path"].is_string());

        let (status, body) = call(&app, "GET", "/api/monitoring/metrics", None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["cpu_usage"], 12.5);
        assert_eq!(body["memory_usage"], 25.0);
        assert_eq!(body["network_io"]["bytes_recv"], 2_000);
        assert_eq!(body["storage"]["uploads"]["file_count"], 1);
        assert_eq!(body["storage"]["models"]["file_count"], 0);
    }

    #[tokio::test]
    async fn introspection_endpoints() {
        let server = test_server();
        let app = server.router();
        server.state().cache.set("k", json!(1), None);

        let (status, body) = call(&app, "GET", "/api/monitoring/connections", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["total"], 0);
        assert_eq!(body["stats"]["max"], server.config().max_connections);

        let (_, body) = call(&app, "GET", "/api/monitoring/cache?keys=true", None).await;
        assert_eq!(body["total_items"], 1);
        assert_eq!(body["keys"][0]["key"], "k");

        let (_, body) = call(&app, "GET", "/api/monitoring/cache", None).await;
        assert!(body.get("keys").is_none());

        assert_eq!(server.start_background(), 6);
        let (_, body) = call(&app, "GET", "/api/monitoring/services", None).await;
        let services = body["services"].as_array().unwrap();
        assert_eq!(services.len(), 4);
        assert_eq!(services[3]["registered_tasks"], 6);
        assert_eq!(services[2]["status"], "running");

        let (_, body) = call(&app, "GET", "/api/monitoring/tasks", None).await;
        assert_eq!(body["system_metrics"]["kind"], "async");
        let _ = server.shutdown().await;
    }
}

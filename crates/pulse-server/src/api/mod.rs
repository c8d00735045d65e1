//! REST API consumed by the dashboard frontend.
//!
//! Handlers return [`ApiResult`] so every failure reaches the client as a
//! `{"detail": ...}` body with the matching status code.

pub mod components;
pub mod dashboard;
pub mod datasets;
pub mod error;
pub mod health;
pub mod models;
pub mod monitoring;
pub mod pipelines;

use axum::Router;
use axum::routing::{get, post};

pub use error::{ApiError, ApiResult};

use crate::server::AppState;

/// Every REST route, ready to be merged into the server router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/upload", post(datasets::upload))
        .route("/api/train", post(models::train))
        .route("/api/training/{job_id}", get(models::training_status))
        .route("/api/models", get(models::list))
        .route("/api/models/{id}", get(models::get).delete(models::delete))
        .route("/api/models/{id}/predict", post(models::predict))
        .route("/api/models/{id}/deploy", post(models::deploy))
        .route("/api/activity", get(dashboard::activity))
        .route("/api/status", get(dashboard::status))
        .route(
            "/api/settings",
            get(dashboard::get_settings).post(dashboard::save_settings),
        )
        .route("/api/pipelines", get(pipelines::list).post(pipelines::create))
        .route(
            "/api/pipelines/{id}",
            get(pipelines::get)
                .put(pipelines::update)
                .delete(pipelines::delete),
        )
        .route("/api/pipelines/{id}/run", post(pipelines::run))
        .route("/api/pipelines/{id}/status", get(pipelines::status))
        .route("/api/datasets", get(datasets::list))
        .route("/api/datasets/{id}", get(datasets::get).delete(datasets::delete))
        .route("/api/datasets/{id}/preview", get(datasets::preview))
        .route("/api/datasets/{id}/statistics", get(datasets::statistics))
        .route("/api/datasets/{id}/validate", post(datasets::validate))
        .route("/api/components/health", get(components::all))
        .route("/api/components/{name}/health", get(components::one))
        .route("/api/monitoring/alerts", get(monitoring::alerts))
        .route(
            "/api/monitoring/alerts/{id}/acknowledge",
            post(monitoring::acknowledge),
        )
        .route("/api/monitoring/services", get(monitoring::services))
        .route("/api/monitoring/metrics", get(monitoring::performance))
        .route("/api/monitoring/connections", get(monitoring::connections))
        .route("/api/monitoring/cache", get(monitoring::cache))
        .route("/api/monitoring/tasks", get(monitoring::tasks))
}

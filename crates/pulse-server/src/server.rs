//! `PulseServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{DefaultBodyLimit, MatchedPath, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use pulse_runtime::{PeriodicTaskScheduler, TtlCache};
use pulse_telemetry::HostSource;
use serde_json::Value;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api;
use crate::config::ServerConfig;
use crate::feed::MetricsSampler;
use crate::housekeeping;
use crate::jobs::JobSupervisor;
use crate::metrics::{HTTP_REQUESTS_TOTAL, render};
use crate::pipelines::PipelineRunner;
use crate::shutdown::ShutdownCoordinator;
use crate::store::DashboardStore;
use crate::training::Trainer;
use crate::websocket::broadcast::BroadcastBus;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::ws_handler;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Resolved configuration.
    pub config: Arc<ServerConfig>,
    /// Live WebSocket connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Fan-out to connected clients.
    pub bus: Arc<BroadcastBus>,
    /// Models, jobs, pipelines, datasets, alerts, activity.
    pub store: Arc<DashboardStore>,
    /// Memoized responses.
    pub cache: Arc<TtlCache<Value>>,
    /// Background housekeeping.
    pub scheduler: Arc<PeriodicTaskScheduler>,
    /// Host metrics feed.
    pub sampler: Arc<MetricsSampler>,
    /// Training job runner.
    pub trainer: Arc<Trainer>,
    /// Pipeline runner.
    pub pipelines: Arc<PipelineRunner>,
    /// In-flight training and pipeline runs.
    pub jobs: Arc<JobSupervisor>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

/// The Pulse server.
pub struct PulseServer {
    state: AppState,
}

impl PulseServer {
    /// Build every component from `config`, reading host metrics from `source`.
    pub fn new(config: ServerConfig, source: Box<dyn HostSource>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.registry_config()));
        let bus = Arc::new(BroadcastBus::new(Arc::clone(&registry)));
        let store = Arc::new(DashboardStore::new(config.dashboard.clone()));
        let cache = Arc::new(TtlCache::new(config.cache_max_size, config.cache_default_ttl));
        let scheduler = Arc::new(PeriodicTaskScheduler::new(config.max_workers));
        let sampler = Arc::new(MetricsSampler::new(source, Arc::clone(&store), Arc::clone(&bus)));
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let jobs = Arc::new(JobSupervisor::new(&shutdown.token()));
        let trainer = Arc::new(Trainer::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&jobs),
            config.models_dir.clone(),
            config.stage_delay,
        ));
        let pipelines = Arc::new(PipelineRunner::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&jobs),
            config.pipeline_step_delay,
        ));

        Self {
            state: AppState {
                config: Arc::new(config),
                registry,
                bus,
                store,
                cache,
                scheduler,
                sampler,
                trainer,
                pipelines,
                jobs,
                shutdown,
                metrics: None,
                start_time: Instant::now(),
            },
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Shared handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let config = &self.state.config;
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/metrics", get(metrics_handler))
            .merge(api::routes())
            .route_layer(middleware::from_fn(track_requests))
            .layer(DefaultBodyLimit::max(config.max_upload_bytes))
            .layer(cors_layer(&config.cors_origins))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Register the housekeeping tasks and start them.
    pub fn start_background(&self) -> usize {
        housekeeping::register_all(&self.state);
        self.state.scheduler.start_all()
    }

    /// Bind and serve until shutdown is signalled.
    ///
    /// Returns the bound address and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.state.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        info!(%addr, "pulse server listening");
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "server exited with error");
            }
        });
        Ok((addr, handle))
    }

    /// Signal shutdown, cancel running jobs and stop the housekeeping tasks.
    ///
    /// Returns `false` if anything was still running at the configured timeout.
    pub async fn shutdown(&self) -> bool {
        self.state.shutdown.shutdown();
        let timeout = self.state.config.shutdown_timeout;
        let (jobs, tasks) = tokio::join!(
            self.state.jobs.shutdown(timeout),
            self.state.scheduler.shutdown(timeout)
        );
        jobs && tasks
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn track_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());
    let response = next.run(request).await;
    counter!(
        HTTP_REQUESTS_TOTAL,
        "route" => route,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => render(handle).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_server;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    #[test]
    fn components_share_one_registry() {
        let server = test_server();
        let state = server.state();
        assert!(Arc::ptr_eq(state.bus.registry(), &state.registry));
        assert!(!state.shutdown.is_shutting_down());
        assert!(state.scheduler.is_empty());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = test_server().router();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ws_route_requires_upgrade() {
        let app = test_server().router();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn metrics_unavailable_without_recorder() {
        let app = test_server().router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_rendered_with_recorder() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let app = test_server().with_metrics(handle).router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn start_background_registers_housekeeping() {
        let server = test_server();
        let started = server.start_background();
        assert!(started >= 4);
        assert!(server.state().scheduler.is_registered("system_metrics"));
        assert!(server.state().scheduler.is_registered("accuracy_drift"));
        assert!(server.shutdown().await);
        assert!(server.state().shutdown.is_shutting_down());
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_training() {
        let config = ServerConfig {
            stage_delay: std::time::Duration::from_secs(60),
            ..crate::testing::test_config()
        };
        let server = PulseServer::new(config, Box::new(crate::testing::StaticHost));
        let state = server.state();
        let csv = state.config.uploads_dir.join("d.csv");
        std::fs::create_dir_all(&state.config.uploads_dir).unwrap();
        std::fs::write(&csv, "f,t\n1,a\n2,b\n").unwrap();

        let job_id = state
            .trainer
            .submit("baseline".into(), csv.display().to_string(), None);
        for _ in 0..200 {
            if state.store.job(&job_id).is_some_and(|j| j.progress >= 10) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(state.jobs.active(), 1);

        let started = Instant::now();
        assert!(server.shutdown().await);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(state.jobs.active(), 0);
        assert_eq!(
            state.store.job(&job_id).unwrap().status,
            pulse_core::records::JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn listen_binds_and_stops_on_shutdown() {
        let server = test_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        let _ = server.shutdown().await;
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn cors_accepts_explicit_origins() {
        let _ = cors_layer(&["http://localhost:3000".to_string(), "bad\norigin".to_string()]);
        let _ = cors_layer(&[]);
    }
}

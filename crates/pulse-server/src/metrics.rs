//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Call once at startup, before anything is recorded. Fails if another
/// recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names recorded across the workspace.

/// HTTP requests served (counter, labels: route, status).
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
/// WebSocket connections admitted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections refused at capacity (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Sends that failed and evicted the client (counter).
pub const WS_BROADCAST_FAILURES_TOTAL: &str = "ws_broadcast_failures_total";
/// Low-priority frames skipped for slow clients (counter).
pub const WS_BROADCAST_SKIPPED_TOTAL: &str = "ws_broadcast_skipped_total";
/// Periodic task executions (counter, labels: task).
pub const SCHEDULER_TASK_RUNS_TOTAL: &str = "scheduler_task_runs_total";
/// Periodic task failures (counter, labels: task).
pub const SCHEDULER_TASK_ERRORS_TOTAL: &str = "scheduler_task_errors_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            HTTP_REQUESTS_TOTAL,
            WS_CONNECTIONS_TOTAL,
            WS_CONNECTIONS_REJECTED_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_BROADCAST_FAILURES_TOTAL,
            WS_BROADCAST_SKIPPED_TOTAL,
            SCHEDULER_TASK_RUNS_TOTAL,
            SCHEDULER_TASK_ERRORS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}

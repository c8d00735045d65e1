//! Shared fixtures for unit tests.

use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use pulse_telemetry::{HostSource, HostSnapshot};
use serde_json::Value;
use tower::ServiceExt;

use crate::config::ServerConfig;
use crate::server::{AppState, PulseServer};

const GIB: u64 = 1024 * 1024 * 1024;

/// Host source that always reports a quiet host.
pub(crate) struct StaticHost;

impl HostSource for StaticHost {
    fn sample(&mut self) -> HostSnapshot {
        HostSnapshot {
            cpu_percent: 12.5,
            cpu_cores: 4,
            load_average_1m: 0.5,
            memory_total_bytes: 16 * GIB,
            memory_used_bytes: 4 * GIB,
            disk_total_bytes: 200 * GIB,
            disk_available_bytes: 150 * GIB,
            network_bytes_sent: 1_000,
            network_bytes_recv: 2_000,
            process_count: 100,
            uptime_secs: 3_600,
        }
    }
}

/// A scratch directory that outlives the test.
pub(crate) fn scratch_dir() -> PathBuf {
    tempfile::Builder::new()
        .prefix("pulse-test")
        .tempdir()
        .unwrap()
        .keep()
}

/// Config bound to an ephemeral localhost port with fast simulated work.
pub(crate) fn test_config() -> ServerConfig {
    let root = scratch_dir();
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        uploads_dir: root.join("uploads"),
        models_dir: root.join("models"),
        stage_delay: Duration::ZERO,
        pipeline_step_delay: Duration::ZERO,
        ..ServerConfig::default()
    }
}

pub(crate) fn test_server() -> PulseServer {
    PulseServer::new(test_config(), Box::new(StaticHost))
}

pub(crate) fn test_state() -> AppState {
    test_server().state().clone()
}

/// Send one request through `app` and decode the JSON reply (`Null` when empty).
pub(crate) async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    send(app, req).await
}

/// Upload `contents` as the multipart `file` field named `filename`.
pub(crate) async fn upload(app: &Router, filename: &str, contents: &str) -> (StatusCode, Value) {
    let boundary = "pulse-test-boundary";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: text/csv\r\n\r\n{contents}\r\n--{boundary}--\r\n"
    );
    let req = Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();
    send(app, req).await
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

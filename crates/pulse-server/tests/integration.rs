//! End-to-end tests against a bound server using a real WebSocket client.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusBuilder;
use pulse_core::Priority;
use pulse_server::{PulseServer, ServerConfig};
use pulse_telemetry::{HostSource, HostSnapshot};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct QuietHost;

impl HostSource for QuietHost {
    fn sample(&mut self) -> HostSnapshot {
        HostSnapshot {
            cpu_percent: 10.0,
            cpu_cores: 2,
            load_average_1m: 0.1,
            memory_total_bytes: 8 << 30,
            memory_used_bytes: 2 << 30,
            disk_total_bytes: 100 << 30,
            disk_available_bytes: 80 << 30,
            network_bytes_sent: 0,
            network_bytes_recv: 0,
            process_count: 42,
            uptime_secs: 60,
        }
    }
}

fn config(max_connections: usize) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        max_connections,
        ..ServerConfig::default()
    }
}

/// Boot a server on an ephemeral port and return it with its WS URL.
async fn boot_server(max_connections: usize) -> (PulseServer, String) {
    let server = PulseServer::new(config(max_connections), Box::new(QuietHost));
    let (addr, _handle) = server.listen().await.unwrap();
    (server, format!("ws://{addr}/ws"))
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url)).await.unwrap().unwrap();
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn wait_for_clients(server: &PulseServer, n: usize) {
    timeout(TIMEOUT, async {
        while server.state().registry.len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn ping_gets_pong_with_same_timestamp() {
    let (server, url) = boot_server(10).await;
    let mut ws = connect(&url).await;

    send_json(&mut ws, json!({ "type": "ping", "timestamp": 1234 })).await;
    let pong = next_json(&mut ws).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["timestamp"], 1234);

    let _ = server.shutdown().await;
}

#[tokio::test]
async fn request_metrics_is_rate_limited() {
    let (server, url) = boot_server(10).await;
    let mut ws = connect(&url).await;

    send_json(&mut ws, json!({ "type": "request_metrics" })).await;
    send_json(&mut ws, json!({ "type": "request_metrics" })).await;
    send_json(&mut ws, json!({ "type": "ping", "timestamp": 1 })).await;

    let first = next_json(&mut ws).await;
    assert_eq!(first["type"], "system_metrics");
    assert_eq!(first["active_connections"], 1);
    // The second request falls inside the gap, so the pong comes next.
    let second = next_json(&mut ws).await;
    assert_eq!(second["type"], "pong");

    let _ = server.shutdown().await;
}

#[tokio::test]
async fn over_capacity_client_is_closed_with_1013() {
    let (server, url) = boot_server(1).await;
    let _first = connect(&url).await;
    wait_for_clients(&server, 1).await;

    let mut second = connect(&url).await;
    let frame = loop {
        match timeout(TIMEOUT, second.next()).await.unwrap() {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => {}
            other => panic!("expected close frame, got {other:?}"),
        }
    };
    let frame = frame.unwrap();
    assert_eq!(u16::from(frame.code), 1013);
    assert_eq!(frame.reason.as_str(), "Server overloaded");
    assert_eq!(server.state().registry.len(), 1);

    let _ = server.shutdown().await;
}

#[tokio::test]
async fn broadcast_reaches_every_client() {
    let (server, url) = boot_server(10).await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    wait_for_clients(&server, 2).await;

    let report = server
        .state()
        .bus
        .broadcast(&json!({ "type": "system_alert", "n": 7 }), Priority::Normal);
    assert_eq!(report.delivered, 2);

    for ws in [&mut a, &mut b] {
        let got = next_json(ws).await;
        assert_eq!(got["n"], 7);
    }

    drop(a);
    wait_until_len(&server, 1).await;
    let _ = server.shutdown().await;
}

async fn wait_until_len(server: &PulseServer, n: usize) {
    timeout(TIMEOUT, async {
        while server.state().registry.len() != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let handle = PrometheusBuilder::new().build_recorder().handle();
    let server = PulseServer::new(config(10), Box::new(QuietHost)).with_metrics(handle);
    let resp = server
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

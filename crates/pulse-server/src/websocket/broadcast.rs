//! Fan-out of serialized messages to every registered client.

use std::sync::Arc;

use metrics::counter;
use pulse_core::{ClientId, DashboardEvent, Priority};
use serde::Serialize;
use tracing::{debug, warn};

use super::connection::Connection;
use super::registry::ConnectionRegistry;

/// Per-broadcast delivery counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Connections the frame was queued for.
    pub delivered: usize,
    /// Slow connections skipped for a low-priority frame.
    pub skipped: usize,
    /// Connections whose send failed and which were evicted.
    pub failed: usize,
}

/// Sends payloads to registered connections.
///
/// Any send failure evicts that connection; the remaining recipients are
/// unaffected.
pub struct BroadcastBus {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastBus {
    /// Create a bus over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this bus sends through.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Serialize `payload` once and queue it for every connection.
    ///
    /// With [`Priority::Low`], connections whose heartbeat is older than the
    /// registry's slow threshold are skipped.
    pub fn broadcast<T: Serialize + ?Sized>(&self, payload: &T, priority: Priority) -> BroadcastReport {
        let text = match serde_json::to_string(payload) {
            Ok(text) => Arc::new(text),
            Err(e) => {
                warn!(error = %e, "failed to serialize broadcast payload");
                return BroadcastReport::default();
            }
        };

        let slow_after = self.registry.config().slow_after;
        let mut report = BroadcastReport::default();
        let mut failed: Vec<Arc<Connection>> = Vec::new();

        for connection in self.registry.snapshot() {
            if priority == Priority::Low && connection.heartbeat_elapsed() > slow_after {
                report.skipped += 1;
                continue;
            }
            match connection.send(Arc::clone(&text)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(client_id = %connection.id, error = %e, "broadcast send failed");
                    failed.push(connection);
                }
            }
        }

        for connection in &failed {
            let _ = self.registry.disconnect(&connection.id);
        }
        report.failed = failed.len();

        if report.skipped > 0 {
            counter!("ws_broadcast_skipped_total").increment(report.skipped as u64);
        }
        if report.failed > 0 {
            counter!("ws_broadcast_failures_total").increment(report.failed as u64);
            warn!(failed = report.failed, "evicted clients after failed broadcast");
        }
        report
    }

    /// Broadcast a typed dashboard event.
    pub fn broadcast_event(&self, event: &DashboardEvent, priority: Priority) -> BroadcastReport {
        let report = self.broadcast(event, priority);
        debug!(
            event_type = event.kind(),
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "broadcast event"
        );
        report
    }

    /// Send `payload` to one connection. A failed send evicts it.
    pub fn send_to<T: Serialize + ?Sized>(&self, id: &ClientId, payload: &T) -> bool {
        let Some(connection) = self.registry.get(id) else {
            return false;
        };
        let text = match serde_json::to_string(payload) {
            Ok(text) => Arc::new(text),
            Err(e) => {
                warn!(client_id = %id, error = %e, "failed to serialize payload");
                return false;
            }
        };
        match connection.send(text) {
            Ok(()) => true,
            Err(e) => {
                debug!(client_id = %id, error = %e, "direct send failed");
                counter!("ws_broadcast_failures_total").increment(1);
                let _ = self.registry.disconnect(id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::registry::RegistryConfig;
    use crate::websocket::transport::{ChannelTransport, Outbound, Transport};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn setup() -> (BroadcastBus, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig::default()));
        (BroadcastBus::new(Arc::clone(&registry)), registry)
    }

    async fn add(registry: &ConnectionRegistry) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (t, rx) = ChannelTransport::new(16);
        let transport: Arc<dyn Transport> = Arc::new(t);
        (registry.connect(transport, None).await.unwrap(), rx)
    }

    fn text(frame: Option<Outbound>) -> Value {
        match frame {
            Some(Outbound::Text(t)) => serde_json::from_str(&t).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delivers_to_everyone_and_counts_bytes() {
        let (bus, registry) = setup();
        let (a, mut rx_a) = add(&registry).await;
        let (b, mut rx_b) = add(&registry).await;

        let payload = json!({"type": "test", "n": 1});
        let len = serde_json::to_string(&payload).unwrap().len() as u64;
        let report = bus.broadcast(&payload, Priority::Normal);

        assert_eq!(report, BroadcastReport { delivered: 2, skipped: 0, failed: 0 });
        assert_eq!(text(rx_a.recv().await)["n"], 1);
        assert_eq!(text(rx_b.recv().await)["type"], "test");
        assert_eq!(a.message_count(), 1);
        assert_eq!(b.bytes_sent(), len);
    }

    #[tokio::test]
    async fn one_failing_client_does_not_affect_others() {
        let (bus, registry) = setup();
        let (_a, mut rx_a) = add(&registry).await;
        let (bad, rx_bad) = add(&registry).await;
        let (_c, mut rx_c) = add(&registry).await;
        drop(rx_bad);

        let report = bus.broadcast(&json!({"type": "x"}), Priority::Normal);

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert!(registry.get(&bad.id).is_none());
        assert_eq!(registry.len(), 2);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_c.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn low_priority_skips_slow_clients() {
        let (bus, registry) = setup();
        let (fresh, mut rx_fresh) = add(&registry).await;
        let (slow, mut rx_slow) = add(&registry).await;

        tokio::time::advance(Duration::from_secs(31)).await;
        registry.update_heartbeat(&fresh.id);

        let report = bus.broadcast(&json!({"type": "drift"}), Priority::Low);
        assert_eq!(report, BroadcastReport { delivered: 1, skipped: 1, failed: 0 });
        assert!(rx_fresh.try_recv().is_ok());
        assert!(rx_slow.try_recv().is_err());
        assert!(registry.get(&slow.id).is_some());

        let report = bus.broadcast(&json!({"type": "important"}), Priority::Normal);
        assert_eq!(report.delivered, 2);
    }

    #[tokio::test]
    async fn broadcast_with_no_clients_is_empty_report() {
        let (bus, _registry) = setup();
        assert_eq!(
            bus.broadcast(&json!({"type": "x"}), Priority::Normal),
            BroadcastReport::default()
        );
    }

    #[tokio::test]
    async fn typed_event_has_type_tag() {
        let (bus, registry) = setup();
        let (_a, mut rx) = add(&registry).await;
        let event = DashboardEvent::TrainingFailed {
            job_id: "job-1".into(),
            error: "bad csv".into(),
        };
        let _ = bus.broadcast_event(&event, Priority::Normal);
        let msg = text(rx.recv().await);
        assert_eq!(msg["type"], "training_failed");
        assert_eq!(msg["job_id"], "job-1");
    }

    #[tokio::test]
    async fn send_to_targets_one_client() {
        let (bus, registry) = setup();
        let (a, mut rx_a) = add(&registry).await;
        let (_b, mut rx_b) = add(&registry).await;

        assert!(bus.send_to(&a.id, &json!({"type": "pong"})));
        assert_eq!(text(rx_a.recv().await)["type"], "pong");
        assert!(rx_b.try_recv().is_err());
        assert!(!bus.send_to(&ClientId::from("nobody"), &json!({})));
    }

    #[tokio::test]
    async fn send_to_failure_evicts() {
        let (bus, registry) = setup();
        let (a, rx) = add(&registry).await;
        drop(rx);
        assert!(!bus.send_to(&a.id, &json!({"type": "pong"})));
        assert!(registry.is_empty());
    }
}

//! Connection registry: admission, lookup, heartbeat tracking and stale eviction.
//!
//! All state sits behind one `parking_lot::Mutex` that is never held across
//! an `.await`. Callers that need to iterate take a [`ConnectionRegistry::snapshot`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use pulse_core::ClientId;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::transport::{Transport, TransportError};

/// Close code sent when the server is at capacity.
pub const CLOSE_OVERLOADED: u16 = 1013;
/// Close code sent to stale connections.
pub const CLOSE_NORMAL: u16 = 1000;

/// How many removed IDs are remembered to prevent reuse.
const RETIRED_CAPACITY: usize = 1000;

/// Registry limits and timings.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Heartbeat age past which a connection is stale.
    pub stale_after: Duration,
    /// Minimum gap between gated stale sweeps.
    pub cleanup_interval: Duration,
    /// Heartbeat window for the `active` statistic.
    pub active_window: Duration,
    /// Heartbeat age past which low-priority broadcasts skip a connection.
    pub slow_after: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            stale_after: Duration::from_secs(120),
            cleanup_interval: Duration::from_secs(300),
            active_window: Duration::from_secs(60),
            slow_after: Duration::from_secs(30),
        }
    }
}

/// Admission failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry is at capacity.
    #[error("connection limit of {max} reached")]
    Full {
        /// Configured maximum.
        max: usize,
    },
    /// The transport handshake failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Aggregate connection counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Registered connections.
    pub total: usize,
    /// Connections with a heartbeat inside the active window.
    pub active: usize,
    /// Capacity.
    pub max: usize,
}

struct State {
    connections: HashMap<ClientId, Arc<Connection>>,
    retired: VecDeque<ClientId>,
    retired_set: HashSet<ClientId>,
    last_cleanup: Instant,
}

impl State {
    fn retire(&mut self, id: ClientId) {
        if !self.retired_set.insert(id.clone()) {
            return;
        }
        self.retired.push_back(id);
        if self.retired.len() > RETIRED_CAPACITY {
            if let Some(oldest) = self.retired.pop_front() {
                let _ = self.retired_set.remove(&oldest);
            }
        }
    }

    fn id_taken(&self, id: &ClientId) -> bool {
        self.connections.contains_key(id) || self.retired_set.contains(id)
    }
}

/// The set of live client connections.
pub struct ConnectionRegistry {
    config: RegistryConfig,
    state: Mutex<State>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                connections: HashMap::new(),
                retired: VecDeque::new(),
                retired_set: HashSet::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Admit a client.
    ///
    /// At capacity the transport is closed with 1013 and nothing is
    /// registered. A `proposed` ID that is live or recently retired is
    /// replaced by a fresh one.
    pub async fn connect(
        &self,
        transport: Arc<dyn Transport>,
        proposed: Option<ClientId>,
    ) -> Result<Arc<Connection>, RegistryError> {
        let max = self.config.max_connections;
        if self.len() >= max {
            return Err(self.reject(&transport).await);
        }

        transport.accept().await?;

        let connection = {
            let mut state = self.state.lock();
            if state.connections.len() >= max {
                None
            } else {
                let id = match proposed {
                    Some(id) if !state.id_taken(&id) => id,
                    Some(id) => {
                        debug!(proposed = %id, "proposed client id in use, generating a new one");
                        fresh_id(&state)
                    }
                    None => fresh_id(&state),
                };
                let connection = Arc::new(Connection::new(id.clone(), Arc::clone(&transport)));
                let _ = state.connections.insert(id, Arc::clone(&connection));
                Some((connection, state.connections.len()))
            }
        };

        let Some((connection, total)) = connection else {
            return Err(self.reject(&transport).await);
        };

        counter!("ws_connections_total").increment(1);
        gauge!("ws_connections_active").set(total as f64);
        info!(client_id = %connection.id, total, "client connected");

        let _ = self.cleanup_stale().await;
        Ok(connection)
    }

    async fn reject(&self, transport: &Arc<dyn Transport>) -> RegistryError {
        let max = self.config.max_connections;
        warn!(max, "connection limit reached, rejecting client");
        counter!("ws_connections_rejected_total").increment(1);
        transport.close(CLOSE_OVERLOADED, "Server overloaded").await;
        RegistryError::Full { max }
    }

    /// Remove a connection. Returns whether anything was removed.
    pub fn disconnect(&self, id: &ClientId) -> bool {
        let (removed, total) = {
            let mut state = self.state.lock();
            let removed = state.connections.remove(id);
            if removed.is_some() {
                state.retire(id.clone());
            }
            (removed, state.connections.len())
        };
        let Some(connection) = removed else {
            return false;
        };
        connection.mark_closed();
        counter!("ws_disconnections_total").increment(1);
        gauge!("ws_connections_active").set(total as f64);
        info!(
            client_id = %id,
            messages = connection.message_count(),
            bytes = connection.bytes_sent(),
            total,
            "client disconnected"
        );
        true
    }

    /// Remove whichever connection wraps `transport`.
    pub fn disconnect_transport(&self, transport: &Arc<dyn Transport>) -> bool {
        let id = {
            let state = self.state.lock();
            state
                .connections
                .values()
                .find(|c| c.uses_transport(transport))
                .map(|c| c.id.clone())
        };
        id.is_some_and(|id| self.disconnect(&id))
    }

    /// Refresh a connection's heartbeat. Unknown IDs are ignored.
    pub fn update_heartbeat(&self, id: &ClientId) {
        if let Some(connection) = self.get(id) {
            connection.touch();
        }
    }

    /// Look up a live connection.
    pub fn get(&self, id: &ClientId) -> Option<Arc<Connection>> {
        self.state.lock().connections.get(id).cloned()
    }

    /// Current counts.
    pub fn stats(&self) -> ConnectionStats {
        let state = self.state.lock();
        let active = state
            .connections
            .values()
            .filter(|c| c.heartbeat_elapsed() <= self.config.active_window)
            .count();
        ConnectionStats {
            total: state.connections.len(),
            active,
            max: self.config.max_connections,
        }
    }

    /// Clone of the live connection list.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.state.lock().connections.values().cloned().collect()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Whether no connections are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep stale connections if the cleanup interval has elapsed since
    /// the last sweep. Returns `None` when not yet due.
    pub async fn cleanup_stale(&self) -> Option<usize> {
        {
            let mut state = self.state.lock();
            let now = Instant::now();
            if now.saturating_duration_since(state.last_cleanup) < self.config.cleanup_interval {
                return None;
            }
            state.last_cleanup = now;
        }
        Some(self.sweep_stale().await)
    }

    /// Remove every connection whose heartbeat is older than `stale_after`,
    /// then close them all concurrently with 1000 "Timeout".
    pub async fn sweep_stale(&self) -> usize {
        let evicted: Vec<Arc<Connection>> = self
            .snapshot()
            .into_iter()
            .filter(|c| c.heartbeat_elapsed() > self.config.stale_after)
            .filter(|c| self.disconnect(&c.id))
            .collect();
        for connection in &evicted {
            debug!(
                client_id = %connection.id,
                idle_secs = connection.heartbeat_elapsed().as_secs(),
                "evicting stale client"
            );
        }
        let _ = join_all(evicted.iter().map(|c| c.close(CLOSE_NORMAL, "Timeout"))).await;

        let removed = evicted.len();
        if removed > 0 {
            info!(removed, "stale connections removed");
        }
        removed
    }
}

fn fresh_id(state: &State) -> ClientId {
    loop {
        let id = ClientId::new();
        if !state.id_taken(&id) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::transport::{ChannelTransport, Outbound};
    use tokio::sync::mpsc;

    fn registry(max: usize) -> ConnectionRegistry {
        ConnectionRegistry::new(RegistryConfig {
            max_connections: max,
            ..RegistryConfig::default()
        })
    }

    fn transport() -> (Arc<dyn Transport>, mpsc::Receiver<Outbound>) {
        let (t, rx) = ChannelTransport::new(16);
        (Arc::new(t), rx)
    }

    #[tokio::test]
    async fn connect_registers_with_zeroed_counters() {
        let reg = registry(10);
        let (t, _rx) = transport();
        let conn = reg.connect(t, None).await.unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(conn.message_count(), 0);
        assert_eq!(conn.bytes_sent(), 0);
        assert!(reg.get(&conn.id).is_some());
    }

    #[tokio::test]
    async fn capacity_is_enforced_with_1013() {
        let reg = registry(2);
        let mut receivers = Vec::new();
        for _ in 0..2 {
            let (t, rx) = transport();
            let _ = reg.connect(t, None).await.unwrap();
            receivers.push(rx);
        }

        let (t, mut rx) = transport();
        let err = reg.connect(t, None).await.unwrap_err();
        assert!(matches!(err, RegistryError::Full { max: 2 }));
        assert_eq!(reg.len(), 2);
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Close {
                code: CLOSE_OVERLOADED,
                reason: "Server overloaded".into()
            })
        );
    }

    #[tokio::test]
    async fn proposed_id_is_used_when_free() {
        let reg = registry(10);
        let (t, _rx) = transport();
        let conn = reg.connect(t, Some(ClientId::from("dash-1"))).await.unwrap();
        assert_eq!(conn.id.as_str(), "dash-1");
    }

    #[tokio::test]
    async fn colliding_proposed_id_is_replaced() {
        let reg = registry(10);
        let (t1, _rx1) = transport();
        let (t2, _rx2) = transport();
        let a = reg.connect(t1, Some(ClientId::from("dup"))).await.unwrap();
        let b = reg.connect(t2, Some(ClientId::from("dup"))).await.unwrap();
        assert_eq!(a.id.as_str(), "dup");
        assert_ne!(b.id, a.id);
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test]
    async fn retired_id_is_not_reused() {
        let reg = registry(10);
        let (t1, _rx1) = transport();
        let a = reg.connect(t1, Some(ClientId::from("old"))).await.unwrap();
        assert!(reg.disconnect(&a.id));

        let (t2, _rx2) = transport();
        let b = reg.connect(t2, Some(ClientId::from("old"))).await.unwrap();
        assert_ne!(b.id.as_str(), "old");
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let reg = registry(10);
        let (t, _rx) = transport();
        let conn = reg.connect(t, None).await.unwrap();
        assert!(reg.disconnect(&conn.id));
        assert!(!reg.disconnect(&conn.id));
        assert!(!reg.disconnect(&ClientId::from("never")));
        assert!(reg.is_empty());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn disconnect_by_transport() {
        let reg = registry(10);
        let (t1, _rx1) = transport();
        let (t2, _rx2) = transport();
        let _ = reg.connect(Arc::clone(&t1), None).await.unwrap();
        let keep = reg.connect(t2, None).await.unwrap();

        assert!(reg.disconnect_transport(&t1));
        assert!(!reg.disconnect_transport(&t1));
        assert_eq!(reg.len(), 1);
        assert!(reg.get(&keep.id).is_some());
    }

    #[tokio::test]
    async fn update_heartbeat_unknown_id_is_noop() {
        let reg = registry(10);
        reg.update_heartbeat(&ClientId::from("ghost"));
        assert!(reg.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stats_counts_active_window() {
        let reg = registry(5);
        let (t1, _rx1) = transport();
        let (t2, _rx2) = transport();
        let a = reg.connect(t1, None).await.unwrap();
        let _b = reg.connect(t2, None).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        reg.update_heartbeat(&a.id);

        assert_eq!(
            reg.stats(),
            ConnectionStats {
                total: 2,
                active: 1,
                max: 5
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_keeps_connection_alive_while_silent_one_is_evicted() {
        let reg = registry(10);
        let (ta, _rx_a) = transport();
        let (tb, mut rx_b) = transport();
        let a = reg.connect(ta, None).await.unwrap();
        let b = reg.connect(tb, None).await.unwrap();

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(60)).await;
            reg.update_heartbeat(&a.id);
        }
        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(reg.cleanup_stale().await, Some(1));
        assert!(reg.get(&a.id).is_some());
        assert!(reg.get(&b.id).is_none());
        assert_eq!(
            rx_b.recv().await,
            Some(Outbound::Close {
                code: CLOSE_NORMAL,
                reason: "Timeout".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_is_gated_by_interval() {
        let reg = registry(10);
        assert_eq!(reg.cleanup_stale().await, None);
        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(reg.cleanup_stale().await, Some(0));
        assert_eq!(reg.cleanup_stale().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_even_when_close_fails() {
        let reg = registry(10);
        let (t, rx) = transport();
        let conn = reg.connect(t, None).await.unwrap();
        drop(rx);

        tokio::time::advance(Duration::from_secs(121)).await;
        assert_eq!(reg.sweep_stale().await, 1);
        assert!(reg.get(&conn.id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_closes_do_not_queue_behind_each_other() {
        let reg = registry(10);
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (t, rx) = ChannelTransport::new(1);
            t.send_text(Arc::new("backlog".into())).unwrap();
            let _ = reg.connect(Arc::new(t), None).await.unwrap();
            receivers.push(rx);
        }

        tokio::time::advance(Duration::from_secs(121)).await;
        let started = Instant::now();
        assert_eq!(reg.sweep_stale().await, 3);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn concurrent_connects_respect_capacity() {
        let reg = Arc::new(registry(8));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                let (t, rx) = ChannelTransport::new(4);
                let ok = reg.connect(Arc::new(t), None).await.is_ok();
                (ok, rx)
            }));
        }
        let mut admitted = 0;
        let mut keep = Vec::new();
        for h in handles {
            let (ok, rx) = h.await.unwrap();
            if ok {
                admitted += 1;
            }
            keep.push(rx);
        }
        assert_eq!(admitted, 8);
        assert_eq!(reg.len(), 8);
    }

    #[test]
    fn retired_set_is_bounded() {
        let mut state = State {
            connections: HashMap::new(),
            retired: VecDeque::new(),
            retired_set: HashSet::new(),
            last_cleanup: Instant::now(),
        };
        for i in 0..(RETIRED_CAPACITY + 10) {
            state.retire(ClientId::from(format!("c{i}")));
        }
        assert_eq!(state.retired.len(), RETIRED_CAPACITY);
        assert_eq!(state.retired_set.len(), RETIRED_CAPACITY);
        assert!(!state.id_taken(&ClientId::from("c0")));
        assert!(state.id_taken(&ClientId::from(format!("c{}", RETIRED_CAPACITY + 9))));
    }
}

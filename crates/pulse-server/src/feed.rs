//! Live metrics feed and health monitoring.
//!
//! [`MetricsSampler`] turns a host reading into a `system_metrics` payload,
//! broadcasts it, and raises a `health_change` (plus an alert and an
//! activity entry) whenever the health classification moves.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use pulse_core::records::{Activity, ActivityKind, ActivityStatus, Alert, AlertSeverity};
use pulse_core::{AlertId, ClientId, DashboardEvent, Priority, SystemHealth, SystemMetrics};
use pulse_telemetry::{HostSource, HostSnapshot};
use tracing::{info, warn};

use crate::store::DashboardStore;
use crate::websocket::broadcast::{BroadcastBus, BroadcastReport};

/// Samples the host and pushes metrics to clients.
pub struct MetricsSampler {
    source: Mutex<Box<dyn HostSource>>,
    store: Arc<DashboardStore>,
    bus: Arc<BroadcastBus>,
    health: Mutex<SystemHealth>,
}

impl MetricsSampler {
    /// Create a sampler reading from `source`.
    pub fn new(source: Box<dyn HostSource>, store: Arc<DashboardStore>, bus: Arc<BroadcastBus>) -> Self {
        Self {
            source: Mutex::new(source),
            store,
            bus,
            health: Mutex::new(SystemHealth::Healthy),
        }
    }

    /// Take a reading and build the payload without sending it.
    pub fn sample(&self) -> SystemMetrics {
        let host = self.source.lock().sample();
        build_metrics(&host, self.bus.registry().stats().active, &self.store)
    }

    /// Sample, check for a health transition, and broadcast.
    pub fn tick(&self) -> BroadcastReport {
        let metrics = self.sample();
        self.observe_health(&metrics);
        self.bus
            .broadcast_event(&DashboardEvent::SystemMetrics(metrics), Priority::Normal)
    }

    /// Sample and send to one client.
    pub fn send_to(&self, id: &ClientId) -> bool {
        let metrics = self.sample();
        self.bus.send_to(id, &DashboardEvent::SystemMetrics(metrics))
    }

    /// Last observed health classification.
    pub fn health(&self) -> SystemHealth {
        *self.health.lock()
    }

    fn observe_health(&self, metrics: &SystemMetrics) {
        let current = metrics.system_health;
        let previous = {
            let mut health = self.health.lock();
            std::mem::replace(&mut *health, current)
        };
        if previous == current {
            return;
        }

        if current == SystemHealth::Healthy {
            info!(%previous, %current, "system health recovered");
        } else {
            warn!(
                %previous,
                %current,
                cpu = metrics.cpu_percent,
                memory = metrics.memory_percent,
                disk = metrics.disk_percent,
                "system health changed"
            );
        }

        let _ = self.bus.broadcast_event(
            &DashboardEvent::HealthChange {
                previous,
                current,
                cpu_percent: metrics.cpu_percent,
                memory_percent: metrics.memory_percent,
                disk_percent: metrics.disk_percent,
                timestamp: metrics.timestamp,
            },
            Priority::Normal,
        );

        let (severity, status) = match current {
            SystemHealth::Critical => (AlertSeverity::Critical, ActivityStatus::Error),
            SystemHealth::Warning => (AlertSeverity::Warning, ActivityStatus::Warning),
            SystemHealth::Healthy => (AlertSeverity::Info, ActivityStatus::Success),
        };
        let message = format!(
            "CPU {:.1}%, memory {:.1}%, disk {:.1}%",
            metrics.cpu_percent, metrics.memory_percent, metrics.disk_percent
        );
        publish_alert(
            &self.store,
            &self.bus,
            Alert {
                id: AlertId::new(),
                title: format!("System health is {current}"),
                message: message.clone(),
                severity,
                source: "metrics".into(),
                created_at: Utc::now(),
                acknowledged: false,
                acknowledged_by: None,
                acknowledged_at: None,
            },
        );
        publish_activity(
            &self.store,
            &self.bus,
            Activity::new(
                ActivityKind::Monitoring,
                format!("Health changed from {previous} to {current}"),
                message,
                status,
            ),
        );
    }
}

/// Build a `system_metrics` payload from a host reading and store state.
pub fn build_metrics(host: &HostSnapshot, connections: usize, store: &DashboardStore) -> SystemMetrics {
    let cpu = round(host.cpu_percent, 1);
    let memory = round(host.memory_percent(), 1);
    let disk = round(host.disk_percent(), 1);
    let (api_ms, ws_ms) = latency_estimate(cpu, memory);
    let training = store.current_training();

    SystemMetrics {
        timestamp: Utc::now(),
        cpu_percent: cpu,
        memory_percent: memory,
        disk_percent: disk,
        active_connections: connections,
        total_models: store.model_count(),
        active_training_jobs: store.active_training_jobs(),
        memory_total_gb: round(HostSnapshot::gib(host.memory_total_bytes), 2),
        memory_used_gb: round(HostSnapshot::gib(host.memory_used_bytes), 2),
        disk_total_gb: round(HostSnapshot::gib(host.disk_total_bytes), 2),
        disk_used_gb: round(HostSnapshot::gib(host.disk_used_bytes()), 2),
        disk_free_gb: round(HostSnapshot::gib(host.disk_available_bytes), 2),
        process_count: host.process_count,
        uptime_hours: round(host.uptime_secs as f64 / 3600.0, 2),
        network_bytes_sent: host.network_bytes_sent,
        network_bytes_recv: host.network_bytes_recv,
        api_response_time_ms: api_ms,
        ws_response_time_ms: ws_ms,
        training_progress: training.as_ref().map(|t| t.progress),
        training_message: training.map(|t| t.message),
        cpu_cores: host.cpu_cores,
        load_average_1m: round(host.load_average_1m, 2),
        system_health: SystemHealth::classify(cpu, memory, disk),
    }
}

/// Latency estimates derived from load: `(api_ms, ws_ms)`.
fn latency_estimate(cpu: f64, memory: f64) -> (f64, f64) {
    let load = (cpu + memory) / 2.0;
    let api = 15.0 + load * 0.5;
    let ws = (api * 0.4).max(5.0);
    (round(api, 1), round(ws, 1))
}

fn round(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    (value * factor).round() / factor
}

/// Record an activity entry and push it to clients.
pub fn publish_activity(store: &DashboardStore, bus: &BroadcastBus, activity: Activity) {
    store.push_activity(activity.clone());
    let _ = bus.broadcast_event(&DashboardEvent::ActivityUpdate { activity }, Priority::Normal);
}

/// Record an alert and push it to clients.
pub fn publish_alert(store: &DashboardStore, bus: &BroadcastBus, alert: Alert) {
    store.push_alert(alert.clone());
    let _ = bus.broadcast_event(&DashboardEvent::SystemAlert { alert }, Priority::Normal);
}

//! # pulse-server
//!
//! HTTP and WebSocket server for the Pulse MLOps dashboard.
//!
//! - [`websocket`]: connection registry, priority-aware broadcast bus, per-client sessions
//! - [`api`]: REST endpoints for datasets, models, pipelines, monitoring and settings
//! - [`feed`]: host metrics sampling, health transitions, alerts and activity
//! - [`training`] / [`pipelines`]: simulated background jobs that report progress live
//! - [`jobs`]: supervisor that cancels and drains those jobs on shutdown
//! - [`housekeeping`]: recurring tasks registered on the runtime scheduler
//!
//! [`PulseServer`] wires these together around a shared [`AppState`].

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod feed;
pub mod housekeeping;
pub mod jobs;
pub mod metrics;
pub mod pipelines;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod training;
pub mod websocket;

#[cfg(test)]
mod testing;

pub use config::ServerConfig;
pub use server::{AppState, PulseServer};
pub use shutdown::ShutdownCoordinator;
pub use store::DashboardStore;

//! # pulse-core
//!
//! Shared vocabulary for the Pulse dashboard backend.
//!
//! - Branded ID newtypes ([`ids`]) so a model ID is never passed where a job ID is expected
//! - Domain records held by the in-memory store ([`records`])
//! - The typed broadcast event envelope pushed to WebSocket clients ([`events`])
//! - Host health classification ([`health`])

#![deny(unsafe_code)]

pub mod events;
pub mod health;
pub mod ids;
pub mod records;

pub use events::{DashboardEvent, Priority, SystemMetrics};
pub use health::SystemHealth;
pub use ids::{ActivityId, AlertId, ClientId, DatasetId, JobId, ModelId, PipelineId};

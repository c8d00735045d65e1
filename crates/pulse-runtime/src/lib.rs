//! # pulse-runtime
//!
//! In-process runtime services shared by the dashboard server:
//!
//! - [`cache::TtlCache`]: capacity-bounded key/value store with per-entry expiry
//! - [`scheduler::PeriodicTaskScheduler`]: named recurring jobs with graceful shutdown
//! - [`cleanup::CleanupPolicy`]: age-based removal of old files, plus [`cleanup::directory_usage`]

#![deny(unsafe_code)]

pub mod cache;
pub mod cleanup;
pub mod scheduler;

pub use cache::{CacheStats, TtlCache, cache_key};
pub use cleanup::{CleanupPolicy, CleanupReport, DirectoryUsage, directory_usage};
pub use scheduler::{PeriodicTaskScheduler, TaskError, TaskFn, TaskStatus};

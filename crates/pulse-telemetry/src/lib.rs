//! # pulse-telemetry
//!
//! Process-wide tracing setup and host resource sampling.
//!
//! - [`init_telemetry`] installs a `tracing-subscriber` registry with an
//!   [`EnvFilter`] and either JSON or compact output on stderr.
//! - [`host`] samples CPU, memory, disk and network counters via `sysinfo`.

#![deny(unsafe_code)]

pub mod host;

pub use host::{HostSource, HostSnapshot, SysinfoHost};

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by the `RUST_LOG` env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `pulse_server` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit one JSON object per line instead of compact text.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from textual level names, skipping any that do not parse.
    pub fn from_names<'a>(
        level: &str,
        modules: impl IntoIterator<Item = (&'a String, &'a String)>,
        json: bool,
    ) -> Self {
        let log_level = level.parse::<Level>().unwrap_or(Level::INFO);
        let module_levels = modules
            .into_iter()
            .filter_map(|(module, lvl)| lvl.parse::<Level>().ok().map(|l| (module.clone(), l)))
            .collect();
        Self {
            log_level,
            module_levels,
            json,
        }
    }

    /// The `EnvFilter` directive equivalent to this config.
    pub fn filter_directive(&self) -> String {
        let mut directive = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            directive.push(',');
            directive.push_str(module);
            directive.push('=');
            directive.push_str(&level.to_string().to_lowercase());
        }
        directive
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case the call has no effect.
pub fn init_telemetry(config: &TelemetryConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_writer(std::io::stderr)
    });
    let compact_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(compact_layer)
        .try_init()
        .is_ok()
}

/// Initialize a compact stderr subscriber at `level`. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

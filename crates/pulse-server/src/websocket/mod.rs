//! WebSocket layer: transport seam, connection registry, broadcast fan-out
//! and per-socket sessions.

pub mod broadcast;
pub mod connection;
pub mod registry;
pub mod session;
pub mod transport;

//! # velocity-server
//!
//! Telemetry relay core and its axum HTTP + `WebSocket` surface.
//!
//! - Session registry: one producer and many subscribers per stream, viewer
//!   count notifications, verbatim fan-out with per-subscriber drop on overflow
//! - Connection pumps: independent read and write tasks per socket, liveness
//!   pings, read and write deadlines
//! - Inactivity sweep over the lifecycle store
//! - REST endpoints for stream lifecycle and feature flags, health, metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod sweep;
pub mod websocket;

pub use config::{PumpConfig, ServerConfig, SweepConfig};
pub use error::ApiError;
pub use server::{AppState, VelocityServer};
pub use sweep::{InactivitySweeper, SweepReport};
pub use websocket::registry::Registry;

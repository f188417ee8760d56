//! relaysrv - relay fleet controller for edge nodes
//!
//! Drives relay outputs from daily schedules and threshold rules, samples
//! per-relay power sensors into the telemetry log, and drains that log into
//! the time-series sink and the cloud gateway.
//!
//! ```text
//!  RelayMonitor ──append──▶ TelemetryLog ──▶ RelayProcessor ──▶ TimeSeriesSink
//!   │   │                       ▲        └─▶ GeneralProcessor ─▶ CloudGateway
//!   │   └─evaluate─▶ RulesEngine │
//!   ▼                            │
//!  RelayManager ◀── CommandListener      collectors (network, environmental)
//! ```

pub mod collectors;
pub mod commands;
pub mod config;
pub mod gateway;
pub mod hardware;
pub mod manager;
pub mod monitor;
pub mod processor;
pub mod service;

/// Service information
pub const SERVICE_NAME: &str = "relaysrv";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::ServiceConfig;
pub use manager::RelayManager;
pub use monitor::{MonitorSettings, RelayMonitor};
pub use service::{Backends, RelayService};

//! Domain-level building blocks shared by the storage and monitor crates.
//!
//! Holds the deposit data model, the persistence traits the scan loop writes
//! through, environment-driven configuration and the telemetry/connectivity
//! services every binary wires up at boot.

pub mod config;
pub mod model;
pub mod services;
pub mod storage;

pub use config::{ConfigError, MonitorConfig, TelegramCredentials};
pub use model::*;
pub use services::connectivity::{ConnectionState, ConnectionSupervisor};
pub use storage::*;

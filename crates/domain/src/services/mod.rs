//! Shared service helpers: telemetry wiring and persistence connectivity.

pub mod connectivity;
pub mod telemetry;

pub use connectivity::*;
pub use telemetry::*;

//! `packwave-observability` — process-wide telemetry wiring.

pub mod tracing;

pub use tracing::init;

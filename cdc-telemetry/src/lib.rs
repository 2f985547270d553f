//! Logging and metrics setup shared by the harness binaries and tests.

pub mod metrics;
pub mod tracing;

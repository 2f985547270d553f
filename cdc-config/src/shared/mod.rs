//! Shared configuration types for the harness.

mod backend;
mod base;
mod bench;
mod cleanup;
mod connection;
mod load;
mod monitor;
mod probe;
mod readiness;
mod schema;

pub use backend::BackendConfig;
pub use base::ValidationError;
pub use bench::{BenchConfig, BenchConfigWithoutSecrets};
pub use cleanup::{CleanupConfig, DEFAULT_MARKER_PREFIX, MarkerConfig};
pub use connection::{
    IntoConnectOptions, MySqlConnectionConfig, MySqlConnectionConfigWithoutSecrets, TlsConfig,
};
pub use load::{LoadConfig, MIN_RATE, validate_rate};
pub use monitor::MonitorConfig;
pub use probe::ProbeConfig;
pub use readiness::ReadinessConfig;
pub use schema::SchemaConfig;

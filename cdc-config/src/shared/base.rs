use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A count that must be positive was zero.
    #[error("`{0}` cannot be zero")]
    Zero(&'static str),
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// The probe deadline does not leave room for a single poll.
    #[error("`probe.max_wait_secs` ({max_wait_ms}ms) must be at least `probe.check_interval_ms` ({check_interval_ms}ms)")]
    MaxWaitBelowCheckInterval {
        max_wait_ms: u64,
        check_interval_ms: u64,
    },
    /// The target rate is negative, not a number, or too small to pace.
    #[error("`load.rate` must be 0 or a finite number of at least 1e-6 rows/s, got {0}")]
    InvalidRate(String),
    /// The warn threshold is below the ok threshold.
    #[error("`monitor.latency_warn_ms` ({warn}) must not be lower than `monitor.latency_ok_ms` ({ok})")]
    LatencyThresholds { ok: u64, warn: u64 },
    /// A marker prefix is empty, which would match every row.
    #[error("marker prefixes cannot be empty")]
    EmptyMarkerPrefix,
}

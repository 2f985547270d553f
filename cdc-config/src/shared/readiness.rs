use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Retry policy used while waiting for collaborators to become reachable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Attempts before an endpoint is declared unready.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Upper bound for a single attempt.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Optional HTTP liveness endpoint of the replication pipeline control plane.
    #[serde(default)]
    pub pipeline_health_url: Option<String>,
    /// Whether the target must report at least one alive backend node.
    #[serde(default = "default_require_target_backends")]
    pub require_target_backends: bool,
}

fn default_max_attempts() -> u32 {
    30
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_attempt_timeout_ms() -> u64 {
    5000
}

fn default_require_target_backends() -> bool {
    true
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            pipeline_health_url: None,
            require_target_backends: default_require_target_backends(),
        }
    }
}

impl ReadinessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::Zero("readiness.max_attempts"));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(ValidationError::Zero("readiness.attempt_timeout_ms"));
        }

        Ok(())
    }
}

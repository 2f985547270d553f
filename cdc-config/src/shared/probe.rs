use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings of the write-then-poll latency probe.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Interval between two polls of the target.
    ///
    /// Default: 1000ms
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Deadline after which a probe is reported as timed out.
    ///
    /// Default: 60s, above the pipeline's usual checkpoint interval.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    /// Wait between confirming a row on the target and deleting it on the source.
    ///
    /// Default: 2000ms
    #[serde(default = "default_delete_settle_ms")]
    pub delete_settle_ms: u64,
}

fn default_check_interval_ms() -> u64 {
    1000
}

fn default_max_wait_secs() -> u64 {
    60
}

fn default_delete_settle_ms() -> u64 {
    2000
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            max_wait_secs: default_max_wait_secs(),
            delete_settle_ms: default_delete_settle_ms(),
        }
    }
}

impl ProbeConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn delete_settle(&self) -> Duration {
        Duration::from_millis(self.delete_settle_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.check_interval_ms == 0 {
            return Err(ValidationError::Zero("probe.check_interval_ms"));
        }

        let max_wait_ms = self.max_wait_secs.saturating_mul(1000);
        if max_wait_ms < self.check_interval_ms {
            return Err(ValidationError::MaxWaitBelowCheckInterval {
                max_wait_ms,
                check_interval_ms: self.check_interval_ms,
            });
        }

        Ok(())
    }
}

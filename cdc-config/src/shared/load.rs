use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Smallest non-zero insert rate, in rows per second.
pub const MIN_RATE: f64 = 1e-6;

/// Settings of the load controller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Rows per multi-row insert in batch mode.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent workers in continuous and unbounded modes.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Target insert rate in rows per second across all workers; `0` disables pacing.
    #[serde(default = "default_rate")]
    pub rate: f64,
    /// Length of a continuous run.
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    /// Upper bound of the drain wait after insertions stop.
    #[serde(default = "default_drain_grace_secs")]
    pub drain_grace_secs: u64,
    /// Interval of the live progress output.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Interval between two sync checks of pending rows.
    #[serde(default = "default_sync_check_interval_ms")]
    pub sync_check_interval_ms: u64,
    /// Maximum pending keys looked up per table and sync check.
    #[serde(default = "default_max_keys_per_check")]
    pub max_keys_per_check: usize,
    /// Confirmed parent keys remembered per table.
    #[serde(default = "default_parent_cache_capacity")]
    pub parent_cache_capacity: usize,
}

fn default_batch_size() -> usize {
    100
}

fn default_workers() -> usize {
    4
}

fn default_rate() -> f64 {
    10.0
}

fn default_duration_secs() -> u64 {
    60
}

fn default_drain_grace_secs() -> u64 {
    60
}

fn default_progress_interval_ms() -> u64 {
    5000
}

fn default_sync_check_interval_ms() -> u64 {
    1000
}

fn default_max_keys_per_check() -> usize {
    2000
}

fn default_parent_cache_capacity() -> usize {
    1000
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            rate: default_rate(),
            duration_secs: default_duration_secs(),
            drain_grace_secs: default_drain_grace_secs(),
            progress_interval_ms: default_progress_interval_ms(),
            sync_check_interval_ms: default_sync_check_interval_ms(),
            max_keys_per_check: default_max_keys_per_check(),
            parent_cache_capacity: default_parent_cache_capacity(),
        }
    }
}

impl LoadConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn sync_check_interval(&self) -> Duration {
        Duration::from_millis(self.sync_check_interval_ms)
    }

    /// Returns the pacing rate, or [`None`] when inserts are unpaced.
    pub fn paced_rate(&self) -> Option<f64> {
        (self.rate > 0.0).then_some(self.rate)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::Zero("load.batch_size"));
        }
        if self.workers == 0 {
            return Err(ValidationError::Zero("load.workers"));
        }
        validate_rate(self.rate)?;
        if self.sync_check_interval_ms == 0 {
            return Err(ValidationError::Zero("load.sync_check_interval_ms"));
        }
        if self.progress_interval_ms == 0 {
            return Err(ValidationError::Zero("load.progress_interval_ms"));
        }
        if self.max_keys_per_check == 0 {
            return Err(ValidationError::Zero("load.max_keys_per_check"));
        }
        if self.parent_cache_capacity == 0 {
            return Err(ValidationError::Zero("load.parent_cache_capacity"));
        }

        Ok(())
    }
}

/// Checks an insert rate: `0` (unpaced) or a finite value of at least [`MIN_RATE`].
pub fn validate_rate(rate: f64) -> Result<(), ValidationError> {
    if rate == 0.0 || (rate.is_finite() && rate >= MIN_RATE) {
        return Ok(());
    }

    Err(ValidationError::InvalidRate(rate.to_string()))
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings of the continuous latency monitor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Latencies below this are healthy.
    #[serde(default = "default_latency_ok_ms")]
    pub latency_ok_ms: u64,
    /// Latencies from this value on are critical.
    #[serde(default = "default_latency_warn_ms")]
    pub latency_warn_ms: u64,
    /// Samples kept per table for the rolling statistics.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Deletes each probe row on the source once it has been measured.
    #[serde(default = "default_remove_probe_rows")]
    pub remove_probe_rows: bool,
    /// Reads source and target row counts every this many samples; `0` never does.
    #[serde(default = "default_counts_every")]
    pub counts_every: u64,
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_latency_ok_ms() -> u64 {
    2000
}

fn default_latency_warn_ms() -> u64 {
    5000
}

fn default_history_size() -> usize {
    100
}

fn default_remove_probe_rows() -> bool {
    true
}

fn default_counts_every() -> u64 {
    10
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            latency_ok_ms: default_latency_ok_ms(),
            latency_warn_ms: default_latency_warn_ms(),
            history_size: default_history_size(),
            remove_probe_rows: default_remove_probe_rows(),
            counts_every: default_counts_every(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.history_size == 0 {
            return Err(ValidationError::Zero("monitor.history_size"));
        }
        if self.latency_warn_ms < self.latency_ok_ms {
            return Err(ValidationError::LatencyThresholds {
                ok: self.latency_ok_ms,
                warn: self.latency_warn_ms,
            });
        }

        Ok(())
    }
}

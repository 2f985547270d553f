use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which collaborators the harness talks to.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BackendConfig {
    /// MySQL source and StarRocks target over the network.
    #[default]
    Mysql,
    /// In-process simulated pipeline, for dry runs.
    Memory {
        #[serde(default = "default_replication_delay_ms")]
        replication_delay_ms: u64,
    },
}

fn default_replication_delay_ms() -> u64 {
    500
}

impl BackendConfig {
    /// Returns the simulated replication delay when the memory backend is selected.
    pub fn memory_delay(&self) -> Option<Duration> {
        match self {
            BackendConfig::Mysql => None,
            BackendConfig::Memory {
                replication_delay_ms,
            } => Some(Duration::from_millis(*replication_delay_ms)),
        }
    }
}

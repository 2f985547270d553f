use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Prefix every harness marker starts with.
pub const DEFAULT_MARKER_PREFIX: &str = "cdcb_";

/// Settings of marker generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarkerConfig {
    #[serde(default = "default_marker_prefix")]
    pub prefix: String,
}

fn default_marker_prefix() -> String {
    DEFAULT_MARKER_PREFIX.to_string()
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            prefix: default_marker_prefix(),
        }
    }
}

/// Settings of the reconciliation pass that removes harness rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Marker prefixes identifying harness rows.
    #[serde(default = "default_marker_prefixes")]
    pub marker_prefixes: Vec<String>,
    /// How long to wait for deletions to reach the target; `0` skips the wait.
    #[serde(default)]
    pub wait_for_target_secs: u64,
    /// Deletes leftovers directly on the target after the wait.
    #[serde(default)]
    pub target_direct_delete: bool,
}

fn default_marker_prefixes() -> Vec<String> {
    vec![DEFAULT_MARKER_PREFIX.to_string()]
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            marker_prefixes: default_marker_prefixes(),
            wait_for_target_secs: 0,
            target_direct_delete: false,
        }
    }
}

impl CleanupConfig {
    pub fn wait_for_target(&self) -> Option<Duration> {
        (self.wait_for_target_secs > 0).then(|| Duration::from_secs(self.wait_for_target_secs))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.marker_prefixes.iter().any(|prefix| prefix.is_empty()) {
            return Err(ValidationError::EmptyMarkerPrefix);
        }

        Ok(())
    }
}

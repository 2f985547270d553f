use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Locations of the schema scripts applied before a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub source_script: Option<PathBuf>,
    #[serde(default)]
    pub target_script: Option<PathBuf>,
    /// Applies the scripts at the start of probe and load commands.
    #[serde(default = "default_apply_on_start")]
    pub apply_on_start: bool,
}

fn default_apply_on_start() -> bool {
    true
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            source_script: None,
            target_script: None,
            apply_on_start: default_apply_on_start(),
        }
    }
}

use cdc_config::load_config;
use cdc_config::shared::BenchConfig;

use crate::error::{BenchError, BenchResult};

/// Loads and validates the harness configuration.
///
/// Uses the layered loading of [`cdc_config`] and validates the resulting [`BenchConfig`]
/// before returning it.
pub fn load_bench_config() -> BenchResult<BenchConfig> {
    let config = load_config::<BenchConfig>().map_err(BenchError::config)?;
    config.validate().map_err(BenchError::config)?;

    Ok(config)
}

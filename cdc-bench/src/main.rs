//! CDC verification and benchmark harness.
//!
//! Writes correlated rows to a MySQL source, polls the StarRocks target until they appear and
//! reports replication latency, throughput and lag. Reports go to stdout, logs to stderr or to
//! rolling files.

use std::process::ExitCode;

use cdc_config::shared::BenchConfig;
use cdc_telemetry::tracing::init_tracing;
use clap::Parser;
use tracing::error;

use crate::args::Args;
use crate::config::load_bench_config;
use crate::core::start_bench;
use crate::error::{BenchError, BenchResult};

mod args;
mod commands;
mod config;
mod core;
mod error;
mod output;

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::from(err.exit_code())
        }
    }
}

/// Loads configuration, installs logging and runs the command on a multi-threaded runtime.
fn run(args: Args) -> BenchResult<()> {
    // Must happen before any thread is spawned, the subscriber and the config loader read it.
    if let Some(log_target) = args.log_target {
        log_target.environment().set();
    }

    let config = load_bench_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(BenchError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(args, config))
}

async fn async_main(args: Args, config: BenchConfig) -> BenchResult<()> {
    let command = args.command.name();
    if let Err(err) = start_bench(args, config).await {
        error!(command, error = %err, "command failed");
        return Err(err);
    }

    Ok(())
}

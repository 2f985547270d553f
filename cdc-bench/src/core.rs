use std::sync::Arc;

use cdc_config::shared::{BenchConfig, BenchConfigWithoutSecrets, MySqlConnectionConfig};
use cdc_harness::clients::memory::MemoryPipeline;
use cdc_harness::clients::mysql::MySqlSource;
use cdc_harness::clients::starrocks::StarRocksTarget;
use cdc_harness::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use cdc_harness::generator::MarkerFactory;
use cdc_harness::metrics::register_metrics;
use cdc_harness::types::EntitySchema;
use cdc_telemetry::metrics::init_metrics;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::args::Args;
use crate::commands::Bench;
use crate::error::{BenchError, BenchResult};

/// Connections kept per pool on top of one per load worker.
const EXTRA_POOL_CONNECTIONS: u32 = 2;

/// Builds the collaborators selected by the configuration and runs the requested command.
///
/// Both backends go through the same generic [`Bench`]; dispatch is static, one branch per
/// backend.
pub async fn start_bench(args: Args, config: BenchConfig) -> BenchResult<()> {
    info!(command = args.command.name(), "starting cdc-bench");
    log_config(&config);

    let schema = Arc::new(EntitySchema::standard());
    let markers = Arc::new(MarkerFactory::new(&config.markers.prefix));

    if let Some(port) = args.metrics_port {
        init_metrics(env!("CARGO_BIN_NAME"), markers.run_prefix(), port)
            .map_err(BenchError::config)?;
        register_metrics();
        info!(port, "serving prometheus metrics");
    }

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let shutdown_handle = spawn_shutdown_listener(shutdown_tx);

    let result = match config.backend.memory_delay() {
        Some(delay) => {
            warn!(
                delay_ms = delay.as_millis() as u64,
                "using the in-memory pipeline, no database is contacted"
            );
            let pipeline = MemoryPipeline::new(schema.clone(), delay);
            let bench = Bench::new(
                pipeline.source(),
                pipeline.target(),
                schema,
                markers,
                config,
                args.format,
                args.table,
            );
            bench.execute(args.command, shutdown_rx).await
        }
        None => {
            let max_connections = config.load.workers as u32 + EXTRA_POOL_CONNECTIONS;
            let acquire_timeout = config.readiness.attempt_timeout();
            let source =
                MySqlSource::connect(&config.source, schema.clone(), max_connections, acquire_timeout);
            let target = StarRocksTarget::connect(
                &config.target,
                schema.clone(),
                max_connections,
                acquire_timeout,
            );
            let bench = Bench::new(
                source,
                target,
                schema,
                markers,
                config,
                args.format,
                args.table,
            );
            bench.execute(args.command, shutdown_rx).await
        }
    };

    // The listener only matters while a command runs.
    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    result
}

/// Forwards SIGINT and SIGTERM to the stop signal of the run.
///
/// Load runs stop inserting and drain, the monitor finishes its current probe.
fn spawn_shutdown_listener(shutdown_tx: ShutdownTx) -> JoinHandle<()> {
    tokio::spawn(async move {
        let sigterm = async {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(err) => {
                    warn!(error = %err, "failed to register sigterm handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sigint (ctrl+c) received, stopping");
            }
            _ = sigterm => {
                info!("sigterm received, stopping");
            }
        }

        shutdown_tx.shutdown();
    })
}

fn log_config(config: &BenchConfig) {
    log_connection_config("source", &config.source);
    log_connection_config("target", &config.target);

    let without_secrets = BenchConfigWithoutSecrets::from(config.clone());
    debug!(
        backend = ?without_secrets.backend,
        probe = ?without_secrets.probe,
        load = ?without_secrets.load,
        cleanup = ?without_secrets.cleanup,
        "harness config"
    );
}

fn log_connection_config(side: &str, config: &MySqlConnectionConfig) {
    debug!(
        side,
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        minimal_session = config.minimal_session,
        "connection config"
    );
}

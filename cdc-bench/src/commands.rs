//! Execution of the CLI commands against one source and one target.
//!
//! [`Bench`] owns the collaborators and the run-wide generator state. Every command builds its
//! probes and controllers from it, so markers stay unique and confirmed parent keys are shared
//! across the steps of `all`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cdc_config::shared::{BenchConfig, ValidationError, validate_rate};
use cdc_harness::bootstrap::{AppliedSchema, SchemaScript, apply_schema};
use cdc_harness::cleanup::{CleanupOptions, cleanup};
use cdc_harness::clients::{SchemaExecutor, SourceClient, TargetClient};
use cdc_harness::concurrency::shutdown::ShutdownRx;
use cdc_harness::generator::{EntityGenerator, MarkerFactory, ParentKeyCache};
use cdc_harness::load::LoadController;
use cdc_harness::monitor::{LatencyMonitor, MonitorEvent};
use cdc_harness::probe::{LatencyProbe, Operation};
use cdc_harness::readiness::{
    EndpointReadiness, PipelineHealth, ServiceEndpoint, SourceLiveness, TargetBackends,
    TargetLiveness, require_ready, wait_all_ready,
};
use cdc_harness::report::{BatchRunReport, CountsReport, Failure, ProbeSummary};
use cdc_harness::types::{EntitySchema, Table};
use cdc_harness::verify::{table_counts, verify};
use cdc_harness::writer::RowWriter;
use serde::Serialize;
use tracing::{info, warn};

use crate::args::Command;
use crate::error::{BenchError, BenchResult};
use crate::output::{OutputFormat, emit};

/// Schema scripts applied on both sides.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub source: AppliedScript,
    pub target: AppliedScript,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedScript {
    pub name: String,
    pub statements: usize,
}

impl From<AppliedSchema> for AppliedScript {
    fn from(value: AppliedSchema) -> Self {
        Self {
            name: value.name,
            statements: value.statements,
        }
    }
}

impl fmt::Display for BootstrapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "source: applied {} statements from {}",
            self.source.statements, self.source.name
        )?;
        write!(
            f,
            "target: applied {} statements from {}",
            self.target.statements, self.target.name
        )
    }
}

/// Combined outcome of the `all` command.
#[derive(Debug, Clone, Serialize)]
pub struct AllReport {
    pub probes: ProbeSummary,
    pub batch: BatchRunReport,
}

impl fmt::Display for AllReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.probes)?;
        write!(f, "{}", self.batch)
    }
}

/// Reachability of every collaborator, with row counts when all of them answered.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub endpoints: Vec<EndpointReadiness>,
    pub counts: Option<CountsReport>,
}

impl StatusReport {
    pub fn all_ready(&self) -> bool {
        self.endpoints
            .iter()
            .all(|endpoint| endpoint.readiness.is_ready())
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for endpoint in &self.endpoints {
            writeln!(f, "{endpoint}")?;
        }
        match &self.counts {
            Some(counts) => write!(f, "{counts}"),
            None => write!(f, "row counts skipped, not every collaborator is reachable"),
        }
    }
}

/// Collaborators and run-wide state shared by every command of one invocation.
pub struct Bench<S, T> {
    source: S,
    target: T,
    schema: Arc<EntitySchema>,
    markers: Arc<MarkerFactory>,
    parents: Arc<ParentKeyCache>,
    config: BenchConfig,
    format: OutputFormat,
    table: Table,
}

impl<S, T> Bench<S, T>
where
    S: SourceClient + SchemaExecutor,
    T: TargetClient + SchemaExecutor,
{
    pub fn new(
        source: S,
        target: T,
        schema: Arc<EntitySchema>,
        markers: Arc<MarkerFactory>,
        config: BenchConfig,
        format: OutputFormat,
        table: Table,
    ) -> Self {
        let parents = Arc::new(ParentKeyCache::new(config.load.parent_cache_capacity));

        Self {
            source,
            target,
            schema,
            markers,
            parents,
            config,
            format,
            table,
        }
    }

    fn writer(&self) -> RowWriter<S> {
        let generator = EntityGenerator::new(
            self.schema.clone(),
            self.markers.clone(),
            self.parents.clone(),
        );
        RowWriter::new(self.source.clone(), generator)
    }

    fn probe(&self) -> LatencyProbe<S, T> {
        LatencyProbe::new(
            self.writer(),
            self.target.clone(),
            self.config.probe.clone(),
        )
    }

    fn controller(&self) -> LoadController<S, T> {
        LoadController::new(
            self.writer(),
            self.target.clone(),
            self.config.probe.clone(),
            self.config.load.clone(),
        )
    }

    fn endpoints(&self) -> Vec<ServiceEndpoint> {
        let readiness = &self.config.readiness;
        let mut endpoints = vec![
            ServiceEndpoint::new(SourceLiveness::new(self.source.clone()), readiness),
            ServiceEndpoint::new(TargetLiveness::new(self.target.clone()), readiness),
        ];
        if readiness.require_target_backends {
            endpoints.push(ServiceEndpoint::new(
                TargetBackends::new(self.target.clone()),
                readiness,
            ));
        }
        if let Some(url) = &readiness.pipeline_health_url {
            endpoints.push(ServiceEndpoint::new(PipelineHealth::new(url), readiness));
        }

        endpoints
    }

    async fn readiness(&self) -> Vec<EndpointReadiness> {
        let outcomes = wait_all_ready(&self.endpoints()).await;
        for outcome in &outcomes {
            info!(endpoint = %outcome.name, ready = outcome.readiness.is_ready(), "readiness outcome");
        }

        outcomes
    }

    /// Applies the configured schema scripts, or the bundled ones, on both sides.
    pub async fn bootstrap(&self) -> BenchResult<BootstrapReport> {
        let source_script = match &self.config.schema.source_script {
            Some(path) => SchemaScript::from_path(path).await?,
            None => SchemaScript::builtin_source(),
        };
        let target_script = match &self.config.schema.target_script {
            Some(path) => SchemaScript::from_path(path).await?,
            None => SchemaScript::builtin_target(),
        };

        let source = apply_schema(&self.source, &source_script).await?;
        let target = apply_schema(&self.target, &target_script).await?;

        Ok(BootstrapReport {
            source: source.into(),
            target: target.into(),
        })
    }

    /// Runs `command` and writes its report to stdout.
    ///
    /// Probe timeouts and partial cleanups are part of the report and do not fail the command.
    pub async fn execute(&self, command: Command, shutdown: ShutdownRx) -> BenchResult<()> {
        if command.requires_ready() {
            let outcomes = self.readiness().await;
            require_ready(&outcomes).map_err(BenchError::Unreachable)?;
        }

        if command.writes_rows() && self.config.schema.apply_on_start {
            let applied = self.bootstrap().await?;
            info!(
                source_statements = applied.source.statements,
                target_statements = applied.target.statements,
                "schema applied"
            );
        }

        info!(command = command.name(), run_prefix = %self.markers.run_prefix(), "running command");

        match command {
            Command::Single => {
                let mut summary = ProbeSummary::new();
                self.probe_operation(&mut self.probe(), &mut summary, Operation::Insert)
                    .await;
                emit(self.format, &summary)
            }
            Command::Multi => {
                let mut summary = ProbeSummary::new();
                self.probe_chain(&mut self.probe(), &mut summary).await;
                emit(self.format, &summary)
            }
            Command::Batch { n } => {
                let count = n.unwrap_or(self.config.load.batch_size);
                emit(self.format, &self.batch(count).await)
            }
            Command::Update => {
                let mut summary = ProbeSummary::new();
                self.probe_operation(&mut self.probe(), &mut summary, Operation::Update)
                    .await;
                emit(self.format, &summary)
            }
            Command::Delete => {
                let mut summary = ProbeSummary::new();
                self.probe_operation(&mut self.probe(), &mut summary, Operation::Delete)
                    .await;
                emit(self.format, &summary)
            }
            Command::All => emit(self.format, &self.all().await),
            Command::Load { n } => {
                let count = n.unwrap_or(self.config.load.batch_size);
                let report = self.controller().run_multi_batch(count).await;
                emit(self.format, &report)
            }
            Command::Continuous { duration, rate } => {
                let duration = duration.map_or_else(|| self.config.load.duration(), Duration::from_secs);
                let rate = self.rate(rate)?;
                let report = self
                    .controller()
                    .run_continuous(&Table::INSERT_ORDER, duration, rate, shutdown)
                    .await?;
                emit(self.format, &report)
            }
            Command::Unlimited { rate } => {
                let rate = self.rate(rate)?;
                info!("inserting until ctrl+c");
                let report = self
                    .controller()
                    .run_unbounded(&Table::INSERT_ORDER, rate, shutdown)
                    .await?;
                emit(self.format, &report)
            }
            Command::Burst {
                bursts,
                size,
                pause,
            } => {
                let size = size.unwrap_or(self.config.load.batch_size);
                let report = self
                    .controller()
                    .run_burst(bursts, size, Duration::from_secs(pause), shutdown)
                    .await?;
                emit(self.format, &report)
            }
            Command::Counts => {
                let report = table_counts(&self.source, &self.target).await;
                emit(self.format, &report)
            }
            Command::Verify { timeout_secs } => {
                let timeout = timeout_secs.map_or_else(|| self.config.probe.max_wait(), Duration::from_secs);
                let report = verify(
                    &self.source,
                    &self.target,
                    timeout,
                    self.config.probe.check_interval(),
                )
                .await;
                emit(self.format, &report)
            }
            Command::Status => self.status().await,
            Command::Cleanup { prefixes } => self.cleanup(prefixes).await,
            Command::Monitor {
                interval_ms,
                tables,
                once,
            } => self.monitor(interval_ms, tables, once, shutdown).await,
            Command::Bootstrap => {
                let report = self.bootstrap().await?;
                emit(self.format, &report)
            }
        }
    }

    async fn probe_operation(
        &self,
        probe: &mut LatencyProbe<S, T>,
        summary: &mut ProbeSummary,
        operation: Operation,
    ) {
        let table = self.table;
        let result = match operation {
            Operation::Insert => probe.probe_insert(table).await,
            Operation::Update => probe.probe_update(table).await,
            Operation::Delete => probe.probe_delete(table).await,
        };

        match result {
            Ok(record) => summary.push(record),
            Err(err) => {
                warn!(%table, %operation, error = %err, "probe failed");
                summary.push_failure(table, operation, &err);
            }
        }
    }

    async fn probe_chain(&self, probe: &mut LatencyProbe<S, T>, summary: &mut ProbeSummary) {
        match probe.probe_chain().await {
            Ok(records) => summary.extend(records),
            Err(err) => {
                warn!(error = %err, "chain probe failed");
                summary.push_failure(Table::Customers, Operation::Insert, &err);
            }
        }
    }

    async fn batch(&self, count: usize) -> BatchRunReport {
        match self.controller().run_batch(self.table, count).await {
            Ok(batch) => BatchRunReport {
                batches: vec![batch],
                failures: Vec::new(),
            },
            Err(err) => {
                warn!(table = %self.table, error = %err, "batch failed");
                BatchRunReport {
                    batches: Vec::new(),
                    failures: vec![Failure::new(self.table, None, &err)],
                }
            }
        }
    }

    async fn all(&self) -> AllReport {
        let mut probe = self.probe();
        let mut probes = ProbeSummary::new();

        self.probe_operation(&mut probe, &mut probes, Operation::Insert)
            .await;
        self.probe_chain(&mut probe, &mut probes).await;
        let batch = self.batch(self.config.load.batch_size).await;
        self.probe_operation(&mut probe, &mut probes, Operation::Update)
            .await;
        self.probe_operation(&mut probe, &mut probes, Operation::Delete)
            .await;

        AllReport { probes, batch }
    }

    async fn status(&self) -> BenchResult<()> {
        let endpoints = self.readiness().await;
        let mut report = StatusReport {
            endpoints,
            counts: None,
        };
        if report.all_ready() {
            report.counts = Some(table_counts(&self.source, &self.target).await);
        }
        emit(self.format, &report)?;

        require_ready(&report.endpoints).map_err(BenchError::Unreachable)
    }

    async fn cleanup(&self, prefixes: Vec<String>) -> BenchResult<()> {
        let mut options =
            CleanupOptions::from_config(&self.config.cleanup, self.config.probe.check_interval());
        if !prefixes.is_empty() {
            options = options.with_prefixes(prefixes);
        }
        if options.prefixes.iter().any(String::is_empty) {
            return Err(BenchError::config(ValidationError::EmptyMarkerPrefix));
        }

        let report = cleanup(&self.source, &self.target, &self.schema, &options).await;
        emit(self.format, &report)?;

        if let Some(err) = report.to_error() {
            warn!(error = %err, "cleanup incomplete, run it again to retry");
        }

        Ok(())
    }

    async fn monitor(
        &self,
        interval_ms: Option<u64>,
        tables: Vec<Table>,
        once: bool,
        shutdown: ShutdownRx,
    ) -> BenchResult<()> {
        let mut config = self.config.monitor.clone();
        if let Some(interval_ms) = interval_ms {
            config.interval_ms = interval_ms;
        }
        let tables = if tables.is_empty() {
            Table::INSERT_ORDER.to_vec()
        } else {
            tables
        };

        let mut monitor = LatencyMonitor::new(self.probe(), tables, config);
        if once {
            let check = monitor.check_once().await;
            return emit(self.format, &check);
        }

        let format = self.format;
        info!("monitoring until ctrl+c");
        let report = monitor
            .run(shutdown, |event| {
                let written = match event {
                    MonitorEvent::Sample(sample) => emit(format, sample),
                    MonitorEvent::Counts(counts) => emit(format, counts),
                };
                if let Err(err) = written {
                    warn!(error = %err, "failed to write monitor output");
                }
            })
            .await;

        emit(self.format, &report)
    }

    /// Resolves the rate of a load command, [`None`] meaning unpaced.
    fn rate(&self, rate: Option<f64>) -> BenchResult<Option<f64>> {
        match rate {
            None => Ok(self.config.load.paced_rate()),
            Some(rate) => {
                validate_rate(rate).map_err(BenchError::config)?;
                Ok((rate > 0.0).then_some(rate))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use cdc_config::shared::BackendConfig;
    use cdc_harness::clients::memory::{MemoryPipeline, MemorySource, MemoryTarget};
    use cdc_harness::concurrency::shutdown::create_shutdown_channel;

    use super::*;

    fn bench(pipeline: &MemoryPipeline, table: Table) -> Bench<MemorySource, MemoryTarget> {
        let mut config = BenchConfig {
            backend: BackendConfig::Memory {
                replication_delay_ms: 500,
            },
            ..BenchConfig::default()
        };
        config.readiness.max_attempts = 2;
        config.readiness.interval_ms = 100;

        Bench::new(
            pipeline.source(),
            pipeline.target(),
            Arc::new(EntitySchema::standard()),
            Arc::new(MarkerFactory::with_salt("cdcb_", "test0001")),
            config,
            OutputFormat::Json,
            table,
        )
    }

    fn pipeline() -> MemoryPipeline {
        MemoryPipeline::new(
            Arc::new(EntitySchema::standard()),
            Duration::from_millis(500),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_applies_the_bundled_scripts_on_both_sides() {
        let pipeline = pipeline();
        let report = bench(&pipeline, Table::Orders).bootstrap().await.unwrap();

        let (source, target) = pipeline.executed_statements().await;
        assert_eq!(report.source.statements, source.len());
        assert_eq!(report.target.statements, target.len());
        assert!(source.iter().any(|statement| statement.contains("order_items")));
    }

    #[tokio::test(start_paused = true)]
    async fn all_runs_every_probe_kind() {
        let pipeline = pipeline();
        let report = bench(&pipeline, Table::Customers).all().await;

        assert!(report.probes.failures.is_empty());
        // insert, five chain rows, update and delete
        assert_eq!(report.probes.records.len(), 8);
        assert_eq!(report.probes.synced(), 8);
        assert_eq!(report.batch.batches.len(), 1);
        assert!(report.batch.batches[0].is_synced());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_source_fails_the_gate() {
        let pipeline = pipeline();
        pipeline.set_source_down(true).await;
        let (_tx, shutdown) = create_shutdown_channel();

        let err = bench(&pipeline, Table::Orders)
            .execute(Command::Counts, shutdown)
            .await
            .unwrap_err();

        assert!(matches!(err, BenchError::Unreachable(_)));
        assert_eq!(err.exit_code(), crate::error::EXIT_UNREACHABLE);
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_counts_only_when_everything_answers() {
        let pipeline = pipeline();
        let bench = bench(&pipeline, Table::Orders);

        let endpoints = bench.readiness().await;
        assert_eq!(endpoints.len(), 3);
        assert!(endpoints.iter().all(|endpoint| endpoint.readiness.is_ready()));

        pipeline.set_alive_backends(0).await;
        let report = StatusReport {
            endpoints: bench.readiness().await,
            counts: None,
        };
        assert!(!report.all_ready());
        assert!(report.to_string().contains("target-backends"));
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_once_returns_without_a_stop_signal() {
        let pipeline = pipeline();
        let (_tx, shutdown) = create_shutdown_channel();

        bench(&pipeline, Table::Orders)
            .monitor(None, vec![Table::Customers, Table::Products], true, shutdown)
            .await
            .unwrap();

        // Probe rows are removed after measurement.
        assert!(pipeline.source_rows(Table::Customers).await.is_empty());
        assert!(pipeline.source_rows(Table::Products).await.is_empty());
    }

    #[test]
    fn rates_fall_back_to_the_configuration() {
        let pipeline = MemoryPipeline::new(Arc::new(EntitySchema::standard()), Duration::ZERO);
        let bench = bench(&pipeline, Table::Orders);

        assert_eq!(bench.rate(None).unwrap(), Some(10.0));
        assert_eq!(bench.rate(Some(0.0)).unwrap(), None);
        assert_eq!(bench.rate(Some(25.0)).unwrap(), Some(25.0));
        assert!(bench.rate(Some(-1.0)).is_err());
        assert!(bench.rate(Some(1e-19)).is_err());
        assert!(bench.rate(Some(f64::NAN)).is_err());
    }
}

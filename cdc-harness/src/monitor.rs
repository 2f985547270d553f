//! Continuous latency monitoring: one insert probe per interval, round-robin over tables.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;

use cdc_config::shared::MonitorConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clients::{SourceClient, TargetClient};
use crate::concurrency::shutdown::ShutdownRx;
use crate::probe::LatencyProbe;
use crate::report::{CountsReport, LatencyClass, LatencyStats, LatencyThresholds, format_latency};
use crate::types::{RowFilter, Table};
use crate::verify::table_counts;

/// The last `capacity` probe results of one table. Timeouts are kept as [`None`].
#[derive(Debug, Clone)]
pub struct TableHistory {
    capacity: usize,
    samples: VecDeque<Option<Duration>>,
    probes: u64,
    timeouts: u64,
    errors: u64,
}

impl TableHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::new(),
            probes: 0,
            timeouts: 0,
            errors: 0,
        }
    }

    pub fn push(&mut self, latency: Option<Duration>) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency);
        self.probes += 1;
        if latency.is_none() {
            self.timeouts += 1;
        }
    }

    pub fn push_error(&mut self) {
        self.errors += 1;
    }

    pub fn last(&self) -> Option<Option<Duration>> {
        self.samples.back().copied()
    }

    /// Statistics over the synced samples in the window.
    pub fn stats(&self) -> Option<LatencyStats> {
        let samples: Vec<Duration> = self.samples.iter().flatten().copied().collect();
        LatencyStats::from_samples(&samples)
    }

    fn summary(&self, table: Table) -> TableSummary {
        TableSummary {
            table,
            probes: self.probes,
            timeouts: self.timeouts,
            errors: self.errors,
            window: self.stats(),
        }
    }
}

/// One monitor measurement.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSample {
    pub timestamp: DateTime<Utc>,
    pub table: Table,
    pub marker: Option<String>,
    #[serde(rename = "latency_ms")]
    pub latency: Option<u64>,
    /// [`None`] when the probe failed with an error.
    pub status: Option<LatencyClass>,
    pub error: Option<String>,
    /// Rolling statistics of the table after this sample.
    pub window: Option<LatencyStats>,
}

impl fmt::Display for MonitorSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self
            .status
            .map_or_else(|| "ERR".to_string(), |status| status.to_string());
        write!(
            f,
            "[{}] [{status:<7}] {:<20} ",
            self.timestamp.format("%H:%M:%S"),
            self.table
        )?;
        match &self.error {
            Some(error) => write!(f, "{error}"),
            None => {
                write!(
                    f,
                    "{:>9}",
                    format_latency(self.latency.map(Duration::from_millis))
                )?;
                if let Some(window) = &self.window {
                    write!(
                        f,
                        "  avg={}ms min={}ms max={}ms p95={}ms",
                        window.avg.as_millis(),
                        window.min.as_millis(),
                        window.max.as_millis(),
                        window.p95.as_millis()
                    )?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub table: Table,
    pub probes: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub window: Option<LatencyStats>,
}

/// Totals of a monitor session.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub tables: Vec<TableSummary>,
}

impl fmt::Display for MonitorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "monitor summary")?;
        for summary in &self.tables {
            write!(
                f,
                "\n{:<20} probes {:>6} timeouts {:>4} errors {:>4}",
                summary.table, summary.probes, summary.timeouts, summary.errors
            )?;
            if let Some(window) = &summary.window {
                write!(f, "  {window}")?;
            }
        }
        Ok(())
    }
}

/// Result of a single pass: current row counts, then one probe per table.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorCheck {
    pub counts: CountsReport,
    pub samples: Vec<MonitorSample>,
}

impl MonitorCheck {
    /// Whether every table synced within the ok threshold.
    pub fn all_ok(&self) -> bool {
        self.samples
            .iter()
            .all(|sample| sample.status == Some(LatencyClass::Ok))
    }
}

impl fmt::Display for MonitorCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.counts)?;
        for sample in &self.samples {
            writeln!(f, "{sample}")?;
        }
        write!(
            f,
            "{}",
            if self.all_ok() { "all tables ok" } else { "some tables degraded" }
        )
    }
}

/// What the monitor hands to its observer while running.
#[derive(Debug, Clone, Copy)]
pub enum MonitorEvent<'a> {
    Sample(&'a MonitorSample),
    /// Row counts, refreshed every `counts_every` samples.
    Counts(&'a CountsReport),
}

/// Probes one table per interval and keeps a rolling latency history per table.
pub struct LatencyMonitor<S, T> {
    probe: LatencyProbe<S, T>,
    tables: Vec<Table>,
    config: MonitorConfig,
    thresholds: LatencyThresholds,
    history: BTreeMap<Table, TableHistory>,
    next: usize,
}

impl<S, T> LatencyMonitor<S, T>
where
    S: SourceClient,
    T: TargetClient,
{
    pub fn new(probe: LatencyProbe<S, T>, tables: Vec<Table>, config: MonitorConfig) -> Self {
        let thresholds = LatencyThresholds::new(
            Duration::from_millis(config.latency_ok_ms),
            Duration::from_millis(config.latency_warn_ms),
        );
        let history = tables
            .iter()
            .map(|table| (*table, TableHistory::new(config.history_size)))
            .collect();

        Self {
            probe,
            tables,
            config,
            thresholds,
            history,
            next: 0,
        }
    }

    pub fn history(&self, table: Table) -> Option<&TableHistory> {
        self.history.get(&table)
    }

    /// Probes the next table in turn.
    ///
    /// Errors become samples without a latency; they never stop the monitor.
    pub async fn probe_next(&mut self) -> Option<MonitorSample> {
        if self.tables.is_empty() {
            return None;
        }

        let table = self.tables[self.next % self.tables.len()];
        self.next += 1;

        let result = if self.config.remove_probe_rows {
            self.probe.probe_transient_insert(table).await
        } else {
            self.probe.probe_insert(table).await
        };

        let history = self
            .history
            .entry(table)
            .or_insert_with(|| TableHistory::new(self.config.history_size));

        let sample = match result {
            Ok(record) => {
                let latency = record.latency();
                history.push(latency);

                if self.config.remove_probe_rows {
                    let removed = self
                        .probe
                        .writer()
                        .source()
                        .delete(table, &RowFilter::Key(record.key))
                        .await;
                    match removed {
                        Ok(rows) => debug!(%table, key = record.key, rows, "removed probe row"),
                        Err(err) => warn!(%table, key = record.key, error = %err, "could not remove probe row"),
                    }
                }

                MonitorSample {
                    timestamp: Utc::now(),
                    table,
                    marker: Some(record.marker),
                    latency: latency.map(|latency| latency.as_millis() as u64),
                    status: Some(self.thresholds.classify(latency)),
                    error: None,
                    window: history.stats(),
                }
            }
            Err(err) => {
                history.push_error();
                warn!(%table, error = %err, "monitor probe failed");

                MonitorSample {
                    timestamp: Utc::now(),
                    table,
                    marker: None,
                    latency: None,
                    status: None,
                    error: Some(err.detail().unwrap_or(err.description()).to_string()),
                    window: history.stats(),
                }
            }
        };

        Some(sample)
    }

    /// Current row counts on both sides.
    pub async fn counts(&mut self) -> CountsReport {
        let source = self.probe.writer().source().clone();
        table_counts(&source, self.probe.target()).await
    }

    /// Reads the row counts, then probes every table once.
    pub async fn check_once(&mut self) -> MonitorCheck {
        let counts = self.counts().await;
        let mut samples = Vec::with_capacity(self.tables.len());
        for _ in 0..self.tables.len() {
            if let Some(sample) = self.probe_next().await {
                samples.push(sample);
            }
        }

        MonitorCheck { counts, samples }
    }

    /// Probes every `config.interval` until `shutdown` fires, passing each sample to `on_event`.
    ///
    /// Row counts are read first and then after every `config.counts_every` samples.
    /// Shutdown is checked between probes, so a probe row is never left half measured.
    pub async fn run<F>(&mut self, mut shutdown: ShutdownRx, mut on_event: F) -> MonitorReport
    where
        F: FnMut(MonitorEvent<'_>),
    {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            tables = self.tables.len(),
            interval_ms = self.config.interval_ms,
            "starting latency monitor"
        );

        let mut samples = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for_shutdown() => break,
                _ = ticker.tick() => {}
            }

            let counts_due = self.config.counts_every > 0 && samples % self.config.counts_every == 0;
            if counts_due {
                let counts = self.counts().await;
                on_event(MonitorEvent::Counts(&counts));
            }

            if let Some(sample) = self.probe_next().await {
                samples += 1;
                on_event(MonitorEvent::Sample(&sample));
            }
        }

        self.report()
    }

    pub fn report(&self) -> MonitorReport {
        MonitorReport {
            tables: self
                .history
                .iter()
                .map(|(table, history)| history.summary(*table))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cdc_config::shared::ProbeConfig;

    use super::*;
    use crate::clients::memory::MemoryPipeline;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::generator::{EntityGenerator, MarkerFactory, ParentKeyCache};
    use crate::types::EntitySchema;
    use crate::writer::RowWriter;

    fn monitor(
        pipeline: &MemoryPipeline,
        remove_probe_rows: bool,
    ) -> LatencyMonitor<crate::clients::memory::MemorySource, crate::clients::memory::MemoryTarget>
    {
        let generator = EntityGenerator::with_seed(
            Arc::new(EntitySchema::standard()),
            Arc::new(MarkerFactory::new("cdcb_")),
            Arc::new(ParentKeyCache::new(10)),
            9,
        );
        let probe = LatencyProbe::new(
            RowWriter::new(pipeline.source(), generator),
            pipeline.target(),
            ProbeConfig {
                check_interval_ms: 100,
                max_wait_secs: 10,
                delete_settle_ms: 0,
            },
        );
        LatencyMonitor::new(
            probe,
            vec![Table::Orders, Table::Products],
            MonitorConfig {
                interval_ms: 1000,
                latency_ok_ms: 2000,
                latency_warn_ms: 5000,
                history_size: 2,
                remove_probe_rows,
                counts_every: 2,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn tables_are_probed_round_robin_and_classified() {
        let pipeline = MemoryPipeline::new(Arc::new(EntitySchema::standard()), Duration::from_secs(3));
        let mut monitor = monitor(&pipeline, false);

        let first = monitor.probe_next().await.unwrap();
        let second = monitor.probe_next().await.unwrap();
        assert_eq!(first.table, Table::Orders);
        assert_eq!(second.table, Table::Products);
        assert_eq!(first.latency, Some(3000));
        assert_eq!(first.status, Some(LatencyClass::Warn));
        assert!(first.to_string().contains("3000ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn history_keeps_a_bounded_window() {
        let pipeline = MemoryPipeline::new(Arc::new(EntitySchema::standard()), Duration::ZERO);
        let mut monitor = monitor(&pipeline, false);

        for _ in 0..6 {
            monitor.probe_next().await.unwrap();
        }

        let history = monitor.history(Table::Orders).unwrap();
        assert_eq!(history.stats().unwrap().count, 2);
        assert_eq!(monitor.report().tables[0].probes, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_rows_are_removed_after_measurement() {
        let pipeline = MemoryPipeline::new(Arc::new(EntitySchema::standard()), Duration::ZERO);
        let mut monitor = monitor(&pipeline, true);

        monitor.probe_next().await.unwrap();
        monitor.probe_next().await.unwrap();

        // The seeded customer stays, the measured order and product are gone.
        assert!(pipeline.source_rows(Table::Orders).await.is_empty());
        assert!(pipeline.source_rows(Table::Products).await.is_empty());
        assert_eq!(pipeline.source_rows(Table::Customers).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_become_samples_and_run_stops_on_shutdown() {
        let pipeline = MemoryPipeline::new(Arc::new(EntitySchema::standard()), Duration::ZERO);
        pipeline.set_source_down(true).await;
        let mut monitor = monitor(&pipeline, true);

        let (tx, rx) = create_shutdown_channel();
        let mut samples = Vec::new();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            tx.shutdown();
        });

        let mut counts = 0;
        let report = monitor
            .run(rx, |event| match event {
                MonitorEvent::Sample(sample) => samples.push(sample.clone()),
                MonitorEvent::Counts(_) => counts += 1,
            })
            .await;
        stopper.await.unwrap();

        // Before the first and the third sample.
        assert_eq!(counts, 2);
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|sample| sample.status.is_none() && sample.error.is_some()));
        assert_eq!(report.tables.iter().map(|t| t.errors).sum::<u64>(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn single_pass_counts_and_probes_every_table() {
        let pipeline = MemoryPipeline::new(Arc::new(EntitySchema::standard()), Duration::from_millis(500));
        let mut monitor = monitor(&pipeline, false);

        let check = monitor.check_once().await;

        assert_eq!(check.samples.len(), 2);
        assert_eq!(check.samples[0].table, Table::Orders);
        assert_eq!(check.samples[1].table, Table::Products);
        assert!(check.all_ok());
        // Counts are read before probing, on an empty pipeline.
        assert_eq!(check.counts.tables.len(), Table::INSERT_ORDER.len());
        assert!(check.counts.tables.iter().all(|counts| counts.source == Some(0)));
        assert!(check.to_string().ends_with("all tables ok"));
    }
}

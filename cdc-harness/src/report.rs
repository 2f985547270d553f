//! Summaries of probe and load runs, rendered as text or serialized as JSON.
//!
//! A timed out measurement never contributes a latency sample; it is counted and shown as
//! `TIMEOUT` instead.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::task::JoinHandle;
use tracing::info;

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::HarnessError;
use crate::load::{CountersSnapshot, LagSample, LoadCounters, SyncSummary};
use crate::probe::{Operation, ProbeOutcome, ProbeRecord};
use crate::types::Table;

/// Default upper bound of a healthy latency.
pub const DEFAULT_LATENCY_OK: Duration = Duration::from_millis(2000);

/// Default lower bound of a critical latency.
pub const DEFAULT_LATENCY_WARN: Duration = Duration::from_millis(5000);

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

fn serialize_opt_millis<S: Serializer>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match duration {
        Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

/// Renders a latency in milliseconds, or `TIMEOUT` when there is none.
pub fn format_latency(latency: Option<Duration>) -> String {
    match latency {
        Some(latency) => format!("{}ms", latency.as_millis()),
        None => "TIMEOUT".to_string(),
    }
}

/// Health class of a latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LatencyClass {
    Ok,
    Warn,
    Critical,
    Timeout,
}

/// Boundaries between [`LatencyClass::Ok`], [`LatencyClass::Warn`] and [`LatencyClass::Critical`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyThresholds {
    pub ok: Duration,
    pub warn: Duration,
}

impl LatencyThresholds {
    pub fn new(ok: Duration, warn: Duration) -> Self {
        Self { ok, warn }
    }

    pub fn classify(&self, latency: Option<Duration>) -> LatencyClass {
        match latency {
            None => LatencyClass::Timeout,
            Some(latency) if latency < self.ok => LatencyClass::Ok,
            Some(latency) if latency < self.warn => LatencyClass::Warn,
            Some(_) => LatencyClass::Critical,
        }
    }
}

impl Default for LatencyThresholds {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_OK, DEFAULT_LATENCY_WARN)
    }
}

impl fmt::Display for LatencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            LatencyClass::Ok => "OK",
            LatencyClass::Warn => "WARN",
            LatencyClass::Critical => "CRIT",
            LatencyClass::Timeout => "TIMEOUT",
        })
    }
}

/// Order statistics of a set of latency samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyStats {
    pub count: usize,
    #[serde(rename = "min_ms", serialize_with = "serialize_millis")]
    pub min: Duration,
    #[serde(rename = "max_ms", serialize_with = "serialize_millis")]
    pub max: Duration,
    #[serde(rename = "avg_ms", serialize_with = "serialize_millis")]
    pub avg: Duration,
    #[serde(rename = "p50_ms", serialize_with = "serialize_millis")]
    pub p50: Duration,
    #[serde(rename = "p95_ms", serialize_with = "serialize_millis")]
    pub p95: Duration,
    #[serde(rename = "p99_ms", serialize_with = "serialize_millis")]
    pub p99: Duration,
}

impl LatencyStats {
    /// Computes the statistics, or [`None`] for an empty sample set.
    ///
    /// Percentiles use the nearest-rank method.
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let total: Duration = sorted.iter().sum();

        Some(Self {
            count: sorted.len(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            avg: total / sorted.len() as u32,
            p50: nearest_rank(&sorted, 50),
            p95: nearest_rank(&sorted, 95),
            p99: nearest_rank(&sorted, 99),
        })
    }
}

/// Running latency statistics over an unbounded stream of samples.
///
/// Count, min, max and average cover every sample; percentiles are computed over the most
/// recent `window` samples only, so memory stays bounded however long a run lasts.
#[derive(Debug, Clone)]
pub struct LatencyAccumulator {
    count: u64,
    min: Duration,
    max: Duration,
    total: Duration,
    window: usize,
    recent: VecDeque<Duration>,
}

impl LatencyAccumulator {
    pub fn new(window: usize) -> Self {
        Self {
            count: 0,
            min: Duration::MAX,
            max: Duration::ZERO,
            total: Duration::ZERO,
            window: window.max(1),
            recent: VecDeque::new(),
        }
    }

    pub fn push(&mut self, latency: Duration) {
        self.count += 1;
        self.min = self.min.min(latency);
        self.max = self.max.max(latency);
        self.total = self.total.saturating_add(latency);

        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(latency);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Samples currently held for percentiles.
    pub fn retained(&self) -> usize {
        self.recent.len()
    }

    pub fn stats(&self) -> Option<LatencyStats> {
        if self.count == 0 {
            return None;
        }

        let mut sorted: Vec<Duration> = self.recent.iter().copied().collect();
        sorted.sort_unstable();
        let avg_nanos = self.total.as_nanos() / u128::from(self.count);

        Some(LatencyStats {
            count: self.count as usize,
            min: self.min,
            max: self.max,
            avg: Duration::from_nanos(u64::try_from(avg_nanos).unwrap_or(u64::MAX)),
            p50: nearest_rank(&sorted, 50),
            p95: nearest_rank(&sorted, 95),
            p99: nearest_rank(&sorted, 99),
        })
    }
}

fn nearest_rank(sorted: &[Duration], percentile: usize) -> Duration {
    let rank = (percentile * sorted.len()).div_ceil(100).max(1);
    sorted[rank.min(sorted.len()) - 1]
}

impl fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} min={}ms avg={}ms p50={}ms p95={}ms p99={}ms max={}ms",
            self.count,
            self.min.as_millis(),
            self.avg.as_millis(),
            self.p50.as_millis(),
            self.p95.as_millis(),
            self.p99.as_millis(),
            self.max.as_millis()
        )
    }
}

/// A probe or batch that failed with an error instead of producing a measurement.
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub table: Table,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    pub kind: String,
    pub error: String,
}

impl Failure {
    pub fn new(table: Table, operation: Option<Operation>, err: &HarnessError) -> Self {
        Self {
            table,
            operation,
            kind: format!("{:?}", err.kind()),
            error: err.detail().unwrap_or(err.description()).to_string(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<20} ", self.table)?;
        if let Some(operation) = self.operation {
            write!(f, "{operation:<7} ")?;
        }
        write!(f, "ERROR    [{}] {}", self.kind, self.error)
    }
}

/// Outcome of a set of probes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProbeSummary {
    pub records: Vec<ProbeRecord>,
    pub failures: Vec<Failure>,
}

impl ProbeSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ProbeRecord) {
        self.records.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = ProbeRecord>) {
        self.records.extend(records);
    }

    pub fn push_failure(&mut self, table: Table, operation: Operation, err: &HarnessError) {
        self.failures
            .push(Failure::new(table, Some(operation), err));
    }

    pub fn synced(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.outcome().is_some_and(|o| o.is_synced()))
            .count()
    }

    pub fn timeouts(&self) -> usize {
        self.records
            .iter()
            .filter(|record| matches!(record.outcome(), Some(ProbeOutcome::Timeout { .. })))
            .count()
    }

    /// Statistics of the synced probes of `operation`.
    pub fn stats(&self, operation: Operation) -> Option<LatencyStats> {
        let samples: Vec<Duration> = self
            .records
            .iter()
            .filter(|record| record.operation == operation)
            .filter_map(ProbeRecord::latency)
            .collect();
        LatencyStats::from_samples(&samples)
    }
}

impl fmt::Display for ProbeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.records {
            writeln!(f, "{record}")?;
        }
        for failure in &self.failures {
            writeln!(f, "{failure}")?;
        }
        write!(
            f,
            "synced: {}  timeouts: {}  errors: {}",
            self.synced(),
            self.timeouts(),
            self.failures.len()
        )?;
        for operation in [Operation::Insert, Operation::Update, Operation::Delete] {
            if let Some(stats) = self.stats(operation) {
                write!(f, "\n{operation:<7} {stats}")?;
            }
        }
        Ok(())
    }
}

/// Outcome of one multi-row insert and the wait for all its rows.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub table: Table,
    pub marker_prefix: String,
    pub requested: usize,
    pub inserted: u64,
    /// Rows visible on the target at the last successful poll.
    pub synced: u64,
    #[serde(rename = "insert_ms", serialize_with = "serialize_millis")]
    pub insert_duration: Duration,
    /// Time from the end of the insert until every row was visible.
    #[serde(rename = "sync_latency_ms", serialize_with = "serialize_opt_millis")]
    pub sync_latency: Option<Duration>,
    #[serde(rename = "waited_ms", serialize_with = "serialize_opt_millis")]
    pub waited: Option<Duration>,
}

impl BatchReport {
    pub fn new(
        table: Table,
        marker_prefix: String,
        requested: usize,
        inserted: u64,
        synced: u64,
        insert_duration: Duration,
        outcome: ProbeOutcome,
    ) -> Self {
        let waited = match outcome {
            ProbeOutcome::Timeout { waited } => Some(waited),
            ProbeOutcome::Synced { .. } => None,
        };

        Self {
            table,
            marker_prefix,
            requested,
            inserted,
            synced,
            insert_duration,
            sync_latency: outcome.latency(),
            waited,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.sync_latency.is_some()
    }

    /// Rows per second written by the insert statement.
    pub fn insert_throughput(&self) -> f64 {
        rate(self.inserted, self.insert_duration)
    }

    /// Rows per second from the start of the insert until the last row was visible.
    pub fn end_to_end_throughput(&self) -> Option<f64> {
        self.sync_latency
            .map(|latency| rate(self.inserted, self.insert_duration + latency))
    }
}

fn rate(rows: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { rows as f64 / secs } else { 0.0 }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<20} batch   {:<8} synced {}/{}  insert {}ms ({:.0} rows/s)",
            self.table,
            if self.is_synced() { "SYNCED" } else { "TIMEOUT" },
            self.synced,
            self.requested,
            self.insert_duration.as_millis(),
            self.insert_throughput()
        )?;
        match (self.sync_latency, self.waited) {
            (Some(latency), _) => write!(
                f,
                "  sync {}ms ({:.0} rows/s end to end)",
                latency.as_millis(),
                self.end_to_end_throughput().unwrap_or_default()
            ),
            (None, Some(waited)) => write!(f, "  gave up after {}ms", waited.as_millis()),
            (None, None) => Ok(()),
        }
    }
}

/// Batches of several tables.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchRunReport {
    pub batches: Vec<BatchReport>,
    pub failures: Vec<Failure>,
}

impl fmt::Display for BatchRunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for batch in &self.batches {
            writeln!(f, "{batch}")?;
        }
        for failure in &self.failures {
            writeln!(f, "{failure}")?;
        }
        let inserted: u64 = self.batches.iter().map(|batch| batch.inserted).sum();
        let synced: u64 = self.batches.iter().map(|batch| batch.synced).sum();
        write!(f, "total synced {synced}/{inserted}")
    }
}

/// Policy a load run followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    Continuous,
    Unbounded,
    Burst,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadMode::Continuous => "continuous",
            LoadMode::Unbounded => "unbounded",
            LoadMode::Burst => "burst",
        })
    }
}

/// Outcome of a continuous, unbounded or burst run.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub mode: LoadMode,
    /// Target rows per second across all workers, [`None`] when unpaced.
    pub rate: Option<f64>,
    pub workers: usize,
    /// Counters when insertions stopped.
    pub at_stop: CountersSnapshot,
    /// Counters after the drain.
    pub counters: CountersSnapshot,
    pub latency: BTreeMap<Table, LatencyStats>,
    pub overall_latency: Option<LatencyStats>,
    /// The most recent lag samples of the run.
    pub lag_samples: Vec<LagSample>,
    /// Largest lag sampled during the run.
    pub peak_lag: u64,
    pub unsynced: BTreeMap<Table, u64>,
    pub drained: bool,
    pub check_failures: u64,
    pub failures: Vec<String>,
}

impl LoadReport {
    pub fn new(
        mode: LoadMode,
        rate: Option<f64>,
        workers: usize,
        at_stop: CountersSnapshot,
        counters: CountersSnapshot,
        summary: SyncSummary,
        errors: &[HarnessError],
    ) -> Self {
        let latency = summary
            .latencies
            .iter()
            .filter_map(|(table, latencies)| latencies.stats().map(|stats| (*table, stats)))
            .collect();

        Self {
            mode,
            rate,
            workers,
            at_stop,
            counters,
            latency,
            overall_latency: summary.overall_latency.stats(),
            lag_samples: summary.lag_samples.into(),
            peak_lag: summary.peak_lag,
            unsynced: summary.unsynced,
            drained: summary.drained,
            check_failures: summary.check_failures,
            failures: errors.iter().map(ToString::to_string).collect(),
        }
    }

}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rate = self
            .rate
            .map_or_else(|| "unpaced".to_string(), |rate| format!("{rate:.1} rows/s"));
        writeln!(f, "{} run, {} workers, {rate}", self.mode, self.workers)?;
        writeln!(
            f,
            "stopped after {:.1}s: inserted {} synced {} errors {} lag {}",
            self.at_stop.elapsed_ms as f64 / 1000.0,
            self.at_stop.inserted,
            self.at_stop.synced,
            self.at_stop.errors,
            self.at_stop.lag
        )?;
        writeln!(
            f,
            "{:<20} {:>10} {:>10} {:>8} {:>8}  latency",
            "table", "inserted", "synced", "errors", "lag"
        )?;
        for table in self.counters.active_tables() {
            write!(
                f,
                "{:<20} {:>10} {:>10} {:>8} {:>8}",
                table.table, table.inserted, table.synced, table.errors, table.lag
            )?;
            match self.latency.get(&table.table) {
                Some(stats) => writeln!(f, "  {stats}")?,
                None => writeln!(f, "  -")?,
            }
        }
        write!(
            f,
            "{}: {} rows unconfirmed, peak lag {}, {:.1} rows/s",
            if self.drained { "drained" } else { "drain incomplete" },
            self.counters.lag,
            self.peak_lag,
            self.counters.insert_rate
        )?;
        for failure in &self.failures {
            write!(f, "\nworker error: {failure}")?;
        }
        Ok(())
    }
}

/// Row counts of one table on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub table: Table,
    pub source: Option<u64>,
    pub target: Option<u64>,
}

impl TableCounts {
    /// Source rows missing on the target; negative when the target has more.
    pub fn lag(&self) -> Option<i64> {
        Some(self.source? as i64 - self.target? as i64)
    }

    pub fn is_synced(&self) -> bool {
        self.lag().is_some_and(|lag| lag <= 0)
    }
}

/// Row counts of every table on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CountsReport {
    pub tables: Vec<TableCounts>,
}

impl CountsReport {
    /// Sum of the positive lags.
    pub fn total_lag(&self) -> u64 {
        self.tables
            .iter()
            .filter_map(TableCounts::lag)
            .map(|lag| lag.max(0) as u64)
            .sum()
    }

    pub fn all_synced(&self) -> bool {
        self.tables.iter().all(TableCounts::is_synced)
    }
}

#[derive(Serialize)]
struct TableCountsView {
    table: Table,
    source: Option<u64>,
    target: Option<u64>,
    lag: Option<i64>,
}

impl Serialize for CountsReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let tables: Vec<TableCountsView> = self
            .tables
            .iter()
            .map(|counts| TableCountsView {
                table: counts.table,
                source: counts.source,
                target: counts.target,
                lag: counts.lag(),
            })
            .collect();

        let mut state = serializer.serialize_struct("CountsReport", 3)?;
        state.serialize_field("tables", &tables)?;
        state.serialize_field("total_lag", &self.total_lag())?;
        state.serialize_field("all_synced", &self.all_synced())?;
        state.end()
    }
}

impl fmt::Display for CountsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<20} {:>12} {:>12} {:>10}  status",
            "table", "source", "target", "lag"
        )?;
        for counts in &self.tables {
            let cell = |count: Option<u64>| count.map_or("ERROR".to_string(), |c| c.to_string());
            let lag = counts.lag().map_or("-".to_string(), |lag| lag.to_string());
            let status = match counts.lag() {
                None => "UNKNOWN",
                Some(lag) if lag <= 0 => "SYNCED",
                Some(_) => "LAGGING",
            };
            writeln!(
                f,
                "{:<20} {:>12} {:>12} {:>10}  {status}",
                counts.table,
                cell(counts.source),
                cell(counts.target),
                lag
            )?;
        }
        if self.all_synced() {
            write!(f, "overall: ALL SYNCED")
        } else {
            write!(f, "overall: TOTAL LAG {}", self.total_lag())
        }
    }
}

/// Outcome of waiting until the target caught up with the source.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub synced: bool,
    pub checks: u32,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub counts: CountsReport,
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.counts)?;
        if self.synced {
            write!(
                f,
                "verified: target caught up after {}ms ({} checks)",
                self.elapsed.as_millis(),
                self.checks
            )
        } else {
            write!(
                f,
                "not verified: target still behind after {}ms ({} checks)",
                self.elapsed.as_millis(),
                self.checks
            )
        }
    }
}

/// Logs the counters every `interval` until `shutdown` fires.
pub fn spawn_progress_reporter(
    counters: Arc<LoadCounters>,
    interval: Duration,
    mut shutdown: ShutdownRx,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.wait_for_shutdown() => break,
                _ = ticker.tick() => {
                    let snapshot = counters.snapshot();
                    info!(
                        elapsed_secs = snapshot.elapsed_ms / 1000,
                        inserted = snapshot.inserted,
                        synced = snapshot.synced,
                        errors = snapshot.errors,
                        lag = snapshot.lag,
                        rate = snapshot.insert_rate,
                        "load progress"
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn stats_use_nearest_rank_percentiles() {
        let samples: Vec<Duration> = (1..=100).map(ms).collect();
        let stats = LatencyStats::from_samples(&samples).unwrap();

        assert_eq!(stats.count, 100);
        assert_eq!(stats.min, ms(1));
        assert_eq!(stats.max, ms(100));
        assert_eq!(stats.p50, ms(50));
        assert_eq!(stats.p95, ms(95));
        assert_eq!(stats.p99, ms(99));
        assert_eq!(stats.avg, Duration::from_micros(50_500));
    }

    #[test]
    fn single_sample_is_every_percentile() {
        let stats = LatencyStats::from_samples(&[ms(7)]).unwrap();
        assert_eq!(stats.p50, ms(7));
        assert_eq!(stats.p99, ms(7));
        assert!(LatencyStats::from_samples(&[]).is_none());
    }

    #[test]
    fn accumulator_keeps_exact_extremes_with_a_bounded_window() {
        let mut latencies = LatencyAccumulator::new(10);
        for millis in 1..=1000 {
            latencies.push(ms(millis));
        }

        assert_eq!(latencies.count(), 1000);
        assert_eq!(latencies.retained(), 10);

        let stats = latencies.stats().unwrap();
        assert_eq!(stats.count, 1000);
        assert_eq!(stats.min, ms(1));
        assert_eq!(stats.max, ms(1000));
        assert_eq!(stats.avg, Duration::from_micros(500_500));
        // Percentiles only see the last ten samples, 991..=1000.
        assert_eq!(stats.p50, ms(995));
        assert_eq!(stats.p99, ms(1000));
        assert!(LatencyAccumulator::new(10).stats().is_none());
    }

    #[test]
    fn classification_boundaries() {
        let thresholds = LatencyThresholds::default();
        assert_eq!(thresholds.classify(Some(ms(1999))), LatencyClass::Ok);
        assert_eq!(thresholds.classify(Some(ms(2000))), LatencyClass::Warn);
        assert_eq!(thresholds.classify(Some(ms(4999))), LatencyClass::Warn);
        assert_eq!(thresholds.classify(Some(ms(5000))), LatencyClass::Critical);
        assert_eq!(thresholds.classify(None), LatencyClass::Timeout);
    }

    #[test]
    fn timeouts_are_never_rendered_as_latencies() {
        assert_eq!(format_latency(Some(ms(1234))), "1234ms");
        assert_eq!(format_latency(None), "TIMEOUT");

        let report = BatchReport::new(
            Table::Orders,
            "cdcb_x_or_b1_".to_string(),
            100,
            100,
            0,
            ms(40),
            ProbeOutcome::Timeout { waited: ms(60_000) },
        );
        let text = report.to_string();
        assert!(text.contains("TIMEOUT"));
        assert!(text.contains("synced 0/100"));

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["sync_latency_ms"].is_null());
        assert_eq!(json["waited_ms"], 60_000);
    }

    #[test]
    fn counts_report_json() {
        let report = CountsReport {
            tables: vec![
                TableCounts {
                    table: Table::Customers,
                    source: Some(120),
                    target: Some(118),
                },
                TableCounts {
                    table: Table::Orders,
                    source: Some(40),
                    target: None,
                },
            ],
        };

        insta::assert_json_snapshot!(report, @r#"
        {
          "tables": [
            {
              "table": "customers",
              "source": 120,
              "target": 118,
              "lag": 2
            },
            {
              "table": "orders",
              "source": 40,
              "target": null,
              "lag": null
            }
          ],
          "total_lag": 2,
          "all_synced": false
        }
        "#);
    }
}

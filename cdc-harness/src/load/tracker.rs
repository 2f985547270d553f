use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clients::TargetClient;
use crate::load::counters::LoadCounters;
use crate::metrics::CDC_LOAD_LAG_ROWS;
use crate::report::LatencyAccumulator;
use crate::types::Table;

/// Latencies kept per table for percentiles.
pub const LATENCY_WINDOW: usize = 10_000;

/// Lag samples kept for the report, oldest dropped first.
pub const LAG_SAMPLE_CAPACITY: usize = 3_600;

/// A row confirmed on the source, handed to the tracker by a worker.
#[derive(Debug, Clone, Copy)]
pub struct WrittenRow {
    pub table: Table,
    pub key: u64,
    pub written_at: Instant,
}

/// Lag observed at one sync check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LagSample {
    pub elapsed_ms: u64,
    pub lag: u64,
}

/// What the tracker learned over a run.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    /// Propagation latency of confirmed rows, per table.
    pub latencies: BTreeMap<Table, LatencyAccumulator>,
    pub overall_latency: LatencyAccumulator,
    /// The last [`LAG_SAMPLE_CAPACITY`] lag samples.
    pub lag_samples: VecDeque<LagSample>,
    pub peak_lag: u64,
    /// Rows still unconfirmed when tracking ended.
    pub unsynced: BTreeMap<Table, u64>,
    pub check_failures: u64,
    /// Whether every row was confirmed before the drain grace period ran out.
    pub drained: bool,
}

/// Confirms inserted rows on the target by key.
///
/// The tracker is the single writer of the synced counters. Rows waiting for confirmation
/// are looked up oldest key first, at most `max_keys_per_check` per table and check.
#[derive(Debug)]
pub struct SyncTracker<T> {
    target: T,
    counters: Arc<LoadCounters>,
    max_keys_per_check: usize,
    pending: BTreeMap<Table, BTreeMap<u64, Instant>>,
    latencies: BTreeMap<Table, LatencyAccumulator>,
    overall_latency: LatencyAccumulator,
    lag_samples: VecDeque<LagSample>,
    peak_lag: u64,
    check_failures: u64,
}

impl<T> SyncTracker<T>
where
    T: TargetClient,
{
    pub fn new(target: T, counters: Arc<LoadCounters>, max_keys_per_check: usize) -> Self {
        Self {
            target,
            counters,
            max_keys_per_check: max_keys_per_check.max(1),
            pending: BTreeMap::new(),
            latencies: BTreeMap::new(),
            overall_latency: LatencyAccumulator::new(LATENCY_WINDOW),
            lag_samples: VecDeque::new(),
            peak_lag: 0,
            check_failures: 0,
        }
    }

    pub fn track(&mut self, row: WrittenRow) {
        self.pending
            .entry(row.table)
            .or_default()
            .insert(row.key, row.written_at);
    }

    /// Number of rows waiting for confirmation.
    pub fn pending(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    /// Looks up pending keys on the target and returns how many were newly confirmed.
    ///
    /// A failed lookup leaves the keys pending for the next check.
    pub async fn check(&mut self) -> u64 {
        let mut confirmed = 0;

        for (table, keys) in self.pending.iter_mut() {
            if keys.is_empty() {
                continue;
            }

            let lookup: Vec<u64> = keys.keys().take(self.max_keys_per_check).copied().collect();
            match self.target.observed_keys(*table, &lookup).await {
                Ok(observed) => {
                    let observed_at = Instant::now();
                    let mut synced = 0;
                    for key in observed {
                        if let Some(written_at) = keys.remove(&key) {
                            let latency = observed_at.saturating_duration_since(written_at);
                            self.latencies
                                .entry(*table)
                                .or_insert_with(|| LatencyAccumulator::new(LATENCY_WINDOW))
                                .push(latency);
                            self.overall_latency.push(latency);
                            synced += 1;
                        }
                    }

                    if synced > 0 {
                        self.counters.record_synced(*table, synced);
                        confirmed += synced;
                    }
                }
                Err(err) => {
                    self.check_failures += 1;
                    warn!(%table, error = %err, "sync check failed, keeping rows pending");
                }
            }
        }

        confirmed
    }

    /// Records the current lag as a sample and as the lag gauge.
    pub fn sample_lag(&mut self) {
        let lag = self.counters.lag();
        gauge!(CDC_LOAD_LAG_ROWS).set(lag as f64);
        self.peak_lag = self.peak_lag.max(lag);
        if self.lag_samples.len() == LAG_SAMPLE_CAPACITY {
            self.lag_samples.pop_front();
        }
        self.lag_samples.push_back(LagSample {
            elapsed_ms: self.counters.elapsed().as_millis() as u64,
            lag,
        });
    }

    /// Tracks rows from `rows` until the channel closes, then drains.
    ///
    /// Once every sender is gone the tracker keeps checking until nothing is pending or
    /// `drain_grace` has passed, whichever comes first.
    pub async fn run(
        mut self,
        mut rows: mpsc::UnboundedReceiver<WrittenRow>,
        check_interval: Duration,
        drain_grace: Duration,
    ) -> SyncSummary {
        let mut ticker = tokio::time::interval(check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut drain_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                row = rows.recv(), if drain_deadline.is_none() => match row {
                    Some(row) => self.track(row),
                    None => {
                        info!(
                            pending = self.pending(),
                            grace_secs = drain_grace.as_secs(),
                            "insertions stopped, draining"
                        );
                        drain_deadline = Some(Instant::now() + drain_grace);
                    }
                },
                _ = ticker.tick() => {
                    while let Ok(row) = rows.try_recv() {
                        self.track(row);
                    }

                    let confirmed = self.check().await;
                    self.sample_lag();
                    debug!(confirmed, pending = self.pending(), "sync check done");

                    if let Some(deadline) = drain_deadline {
                        if self.pending() == 0 {
                            return self.finish(true);
                        }
                        if Instant::now() >= deadline {
                            warn!(unsynced = self.pending(), "drain grace period over, rows left unconfirmed");
                            return self.finish(false);
                        }
                    }
                }
            }
        }
    }

    pub fn finish(self, drained: bool) -> SyncSummary {
        let unsynced = self
            .pending
            .iter()
            .filter(|(_, keys)| !keys.is_empty())
            .map(|(table, keys)| (*table, keys.len() as u64))
            .collect();

        SyncSummary {
            latencies: self.latencies,
            overall_latency: self.overall_latency,
            lag_samples: self.lag_samples,
            peak_lag: self.peak_lag,
            unsynced,
            check_failures: self.check_failures,
            drained,
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use cdc_config::shared::{LoadConfig, ProbeConfig};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bail;
use crate::clients::{SourceClient, TargetClient};
use crate::concurrency::pacer::Pacer;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, HarnessResult};
use crate::harness_error;
use crate::load::counters::{CountersSnapshot, LoadCounters};
use crate::load::pool::WorkerPool;
use crate::load::tracker::{SyncSummary, SyncTracker, WrittenRow};
use crate::probe::{Expectation, poll_target};
use crate::report::{BatchReport, BatchRunReport, Failure, LoadMode, LoadReport, spawn_progress_reporter};
use crate::types::{RowFilter, Table};
use crate::writer::{InsertedBatch, RowWriter};

/// Pause after a failed insert before a worker tries again.
const INSERT_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Drives load into the source and measures how fast it reaches the target.
///
/// Batch runs write one multi-row statement per table and poll until every row is visible.
/// Continuous, unbounded and burst runs write single rows, hand their keys to a
/// [`SyncTracker`] and finish with a bounded drain.
#[derive(Debug)]
pub struct LoadController<S, T> {
    writer: RowWriter<S>,
    target: T,
    probe_config: ProbeConfig,
    config: LoadConfig,
}

impl<S, T> LoadController<S, T>
where
    S: SourceClient,
    T: TargetClient,
{
    pub fn new(writer: RowWriter<S>, target: T, probe_config: ProbeConfig, config: LoadConfig) -> Self {
        Self {
            writer,
            target,
            probe_config,
            config,
        }
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Inserts `count` rows of `table` in one statement and waits until all are visible.
    pub async fn run_batch(&mut self, table: Table, count: usize) -> HarnessResult<BatchReport> {
        let batch = self.writer.insert_batch(table, count).await?;
        info!(
            %table,
            rows = batch.keys.count,
            insert_ms = batch.insert_duration.as_millis() as u64,
            "batch inserted"
        );

        Ok(self.await_batch(count, batch).await)
    }

    /// Runs a batch of `count` rows on every table, parents first, and waits for all of them.
    ///
    /// A table whose insert fails is reported and does not stop the others.
    pub async fn run_multi_batch(&mut self, count: usize) -> BatchRunReport {
        let mut report = BatchRunReport::default();
        let mut batches = Vec::new();

        for table in Table::INSERT_ORDER {
            match self.writer.insert_batch(table, count).await {
                Ok(batch) => batches.push(batch),
                Err(err) => {
                    warn!(%table, error = %err, "batch insert failed");
                    report.failures.push(Failure::new(table, None, &err));
                }
            }
        }

        report.batches = join_all(batches.into_iter().map(|batch| self.await_batch(count, batch))).await;
        report
    }

    async fn await_batch(&self, requested: usize, batch: InsertedBatch) -> BatchReport {
        let table = batch.table;
        let inserted = batch.keys.count;
        let filter = if self.writer.schema().spec(table).has_marker() {
            RowFilter::MarkerPrefix(batch.marker_prefix.clone())
        } else {
            RowFilter::KeyRange {
                first: batch.keys.first,
                last: batch.keys.last().unwrap_or(batch.keys.first),
            }
        };

        let poll = poll_target(
            &self.target,
            table,
            &filter,
            Expectation::AtLeast(inserted),
            batch.written_at,
            &self.probe_config,
        )
        .await;
        let synced = poll.last_count.unwrap_or_default().min(inserted);

        let report = BatchReport::new(
            table,
            batch.marker_prefix,
            requested,
            inserted,
            synced,
            batch.insert_duration,
            poll.outcome,
        );
        match report.sync_latency {
            Some(latency) => info!(%table, synced, latency_ms = latency.as_millis() as u64, "batch synced"),
            None => warn!(%table, synced, inserted, "batch not fully visible before the deadline"),
        }

        report
    }

    /// Inserts single rows round-robin over `tables` for `duration`, then drains.
    ///
    /// `rate` is the target across all workers. A stop request on `shutdown` ends the run early.
    pub async fn run_continuous(
        &mut self,
        tables: &[Table],
        duration: Duration,
        rate: Option<f64>,
        shutdown: ShutdownRx,
    ) -> HarnessResult<LoadReport> {
        self.run_workers(LoadMode::Continuous, tables, rate, Some(duration), shutdown)
            .await
    }

    /// Inserts single rows round-robin over `tables` until `shutdown` fires, then drains.
    pub async fn run_unbounded(
        &mut self,
        tables: &[Table],
        rate: Option<f64>,
        shutdown: ShutdownRx,
    ) -> HarnessResult<LoadReport> {
        self.run_workers(LoadMode::Unbounded, tables, rate, None, shutdown)
            .await
    }

    async fn run_workers(
        &mut self,
        mode: LoadMode,
        tables: &[Table],
        rate: Option<f64>,
        stop_after: Option<Duration>,
        mut shutdown: ShutdownRx,
    ) -> HarnessResult<LoadReport> {
        if tables.is_empty() {
            bail!(ErrorKind::InvalidData, "A load run needs at least one table");
        }

        let workers = self.config.workers.max(1);
        let per_worker_rate = rate.map(|rate| rate / workers as f64);
        let pacers = (0..workers)
            .map(|_| Pacer::new(per_worker_rate))
            .collect::<HarnessResult<Vec<_>>>()?;
        let tracking = Tracking::start(self.target.clone(), &self.config);
        let (stop_tx, stop_rx) = create_shutdown_channel();
        let tables: Arc<[Table]> = tables.into();

        info!(%mode, workers, rate = ?rate, tables = tables.len(), "starting load run");

        let mut pool = WorkerPool::new();
        for (id, pacer) in pacers.into_iter().enumerate() {
            pool.spawn(
                id,
                run_worker(
                    id,
                    self.writer.fork(),
                    tables.clone(),
                    pacer,
                    tracking.counters.clone(),
                    tracking.rows.clone(),
                    stop_rx.clone(),
                ),
            );
        }

        match stop_after {
            Some(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => info!("run duration elapsed"),
                    _ = shutdown.wait_for_shutdown() => info!("stop requested"),
                }
            }
            None => {
                shutdown.wait_for_shutdown().await;
                info!("stop requested");
            }
        }

        // Workers finish the write they are in and exit.
        stop_tx.shutdown();
        let errors = pool.wait_all().await;

        let (at_stop, counters, summary) = tracking.finish().await?;
        let report = LoadReport::new(mode, rate, workers, at_stop, counters, summary, &errors);
        info!(
            %mode,
            inserted = report.counters.inserted,
            synced = report.counters.synced,
            drained = report.drained,
            "load run finished"
        );

        Ok(report)
    }

    /// Inserts `bursts` groups of `size` correlated chains, pausing `pause` between groups.
    ///
    /// Each chain is a customer, a product, an order, an order item and an inventory
    /// movement referencing each other. Rows are tracked and drained like a continuous run.
    pub async fn run_burst(
        &mut self,
        bursts: usize,
        size: usize,
        pause: Duration,
        mut shutdown: ShutdownRx,
    ) -> HarnessResult<LoadReport> {
        let tracking = Tracking::start(self.target.clone(), &self.config);
        let counters = tracking.counters.clone();
        let rows = tracking.rows.clone();

        info!(bursts, size, pause_secs = pause.as_secs(), "starting burst run");

        'bursts: for burst in 0..bursts {
            let started = tokio::time::Instant::now();
            for _ in 0..size {
                if shutdown.is_shutdown() {
                    break 'bursts;
                }
                self.insert_chain(&counters, &rows).await;
            }
            info!(
                burst = burst + 1,
                bursts,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "burst completed"
            );

            if burst + 1 < bursts {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown.wait_for_shutdown() => break 'bursts,
                }
            }
        }
        drop(rows);

        let (at_stop, final_counters, summary) = tracking.finish().await?;
        Ok(LoadReport::new(LoadMode::Burst, None, 1, at_stop, final_counters, summary, &[]))
    }

    async fn insert_chain(&mut self, counters: &LoadCounters, rows: &mpsc::UnboundedSender<WrittenRow>) {
        let writer = &mut self.writer;
        let Some(customer) = insert_tracked(writer, Table::Customers, &[], counters, rows).await else {
            return;
        };
        let Some(product) = insert_tracked(writer, Table::Products, &[], counters, rows).await else {
            return;
        };
        let Some(order) = insert_tracked(
            writer,
            Table::Orders,
            &[(Table::Customers, customer)],
            counters,
            rows,
        )
        .await
        else {
            return;
        };

        insert_tracked(
            writer,
            Table::OrderItems,
            &[(Table::Orders, order), (Table::Products, product)],
            counters,
            rows,
        )
        .await;
        insert_tracked(
            writer,
            Table::InventoryMovements,
            &[(Table::Products, product)],
            counters,
            rows,
        )
        .await;
    }
}

/// Counters, sync tracker and progress reporter of a single-row run.
struct Tracking {
    counters: Arc<LoadCounters>,
    rows: mpsc::UnboundedSender<WrittenRow>,
    tracker: JoinHandle<SyncSummary>,
    progress_stop: ShutdownTx,
    progress: JoinHandle<()>,
}

impl Tracking {
    fn start<T: TargetClient>(target: T, config: &LoadConfig) -> Self {
        let counters = Arc::new(LoadCounters::new());
        let (rows, rows_rx) = mpsc::unbounded_channel();

        let tracker = SyncTracker::new(target, counters.clone(), config.max_keys_per_check);
        let tracker = tokio::spawn(tracker.run(
            rows_rx,
            config.sync_check_interval(),
            config.drain_grace(),
        ));

        let (progress_stop, progress_rx) = create_shutdown_channel();
        let progress = spawn_progress_reporter(counters.clone(), config.progress_interval(), progress_rx);

        Self {
            counters,
            rows,
            tracker,
            progress_stop,
            progress,
        }
    }

    /// Closes the row channel, waits for the drain and stops the progress output.
    ///
    /// Every other sender must be dropped already, or the drain never starts.
    async fn finish(self) -> HarnessResult<(CountersSnapshot, CountersSnapshot, SyncSummary)> {
        let at_stop = self.counters.snapshot();
        drop(self.rows);

        let summary = self.tracker.await.map_err(|err| {
            harness_error!(ErrorKind::WorkerPanic, "Sync tracker panicked", err)
        })?;

        self.progress_stop.shutdown();
        if let Err(err) = self.progress.await {
            warn!(error = %err, "progress reporter failed");
        }

        Ok((at_stop, self.counters.snapshot(), summary))
    }
}

async fn run_worker<S: SourceClient>(
    id: usize,
    mut writer: RowWriter<S>,
    tables: Arc<[Table]>,
    mut pacer: Pacer,
    counters: Arc<LoadCounters>,
    rows: mpsc::UnboundedSender<WrittenRow>,
    mut stop: ShutdownRx,
) -> HarnessResult<()> {
    let mut next = id;

    loop {
        tokio::select! {
            biased;
            _ = stop.wait_for_shutdown() => break,
            _ = pacer.tick() => {}
        }

        let table = tables[next % tables.len()];
        next += 1;

        if insert_tracked(&mut writer, table, &[], &counters, &rows)
            .await
            .is_none()
        {
            tokio::select! {
                _ = stop.wait_for_shutdown() => break,
                _ = tokio::time::sleep(INSERT_ERROR_BACKOFF) => {}
            }
        }
    }

    debug!(worker = id, "load worker stopped");
    Ok(())
}

/// Inserts one row, counts it with any ancestors created for it and hands them to the tracker.
///
/// Returns the key, or [`None`] after counting and logging a failed insert.
async fn insert_tracked<S: SourceClient>(
    writer: &mut RowWriter<S>,
    table: Table,
    parents: &[(Table, u64)],
    counters: &LoadCounters,
    rows: &mpsc::UnboundedSender<WrittenRow>,
) -> Option<u64> {
    let inserted = match writer.insert_referencing(table, parents).await {
        Ok(inserted) => inserted,
        Err(err) => {
            counters.record_error(table);
            warn!(%table, error = %err, "insert failed");
            return None;
        }
    };

    let written = inserted
        .created_parents
        .iter()
        .copied()
        .chain(std::iter::once((table, inserted.key)));
    for (table, key) in written {
        counters.record_inserted(table, 1);
        let row = WrittenRow {
            table,
            key,
            written_at: inserted.written_at,
        };
        if rows.send(row).is_err() {
            warn!(%table, key, "sync tracker stopped, row will not be confirmed");
        }
    }

    Some(inserted.key)
}

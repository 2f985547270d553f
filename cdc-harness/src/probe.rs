//! Write-then-poll measurement of propagation latency.
//!
//! A probe issues one write on the source, recording its completion time, then polls the
//! target at a fixed interval until the expected post-state is observed (`SYNCED`) or the
//! deadline passes (`TIMEOUT`). Poll errors count as "not yet visible". A timed out probe
//! never carries a latency.

use std::fmt;
use std::time::Duration;

use cdc_config::shared::ProbeConfig;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clients::{SourceClient, TargetClient};
use crate::error::{ErrorKind, HarnessResult};
use crate::metrics::{
    CDC_PROBE_LATENCY_SECONDS, CDC_PROBE_TOTAL, OPERATION_LABEL, OUTCOME_LABEL, TABLE_LABEL,
};
use crate::types::{RowFilter, Table, Value};
use crate::writer::{InsertedRow, RowWriter};
use crate::{bail, harness_error};

/// Offset added to order item quantities rewritten by update probes, above any generated value.
const UPDATED_QUANTITY_BASE: i64 = 1_000;

/// The mutation a probe measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Terminal state of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// First matching poll, `latency` after the source write completed.
    Synced { latency: Duration },
    /// No matching poll within the deadline.
    Timeout { waited: Duration },
}

impl ProbeOutcome {
    /// Returns the latency of a synced probe; timeouts have none.
    pub fn latency(&self) -> Option<Duration> {
        match self {
            ProbeOutcome::Synced { latency } => Some(*latency),
            ProbeOutcome::Timeout { .. } => None,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, ProbeOutcome::Synced { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Synced { .. } => "synced",
            ProbeOutcome::Timeout { .. } => "timeout",
        }
    }
}

/// One measured write-then-poll cycle.
///
/// Owned by the probe that issued the write; the outcome is assigned exactly once.
#[derive(Debug, Clone)]
pub struct ProbeRecord {
    pub marker: String,
    pub table: Table,
    pub operation: Operation,
    pub key: u64,
    pub written_at: Instant,
    pub written_at_wall: DateTime<Utc>,
    observed_at: Option<Instant>,
    outcome: Option<ProbeOutcome>,
    polls: u32,
    poll_errors: u32,
}

impl ProbeRecord {
    pub fn issued(
        marker: impl Into<String>,
        table: Table,
        operation: Operation,
        key: u64,
        written_at: Instant,
    ) -> Self {
        Self {
            marker: marker.into(),
            table,
            operation,
            key,
            written_at,
            written_at_wall: Utc::now(),
            observed_at: None,
            outcome: None,
            polls: 0,
            poll_errors: 0,
        }
    }

    /// Assigns the terminal outcome of the poll loop.
    ///
    /// Fails with [`ErrorKind::InvalidState`] when the record is already resolved.
    pub fn resolve(&mut self, poll: PollResult) -> HarnessResult<()> {
        if let Some(outcome) = self.outcome {
            bail!(
                ErrorKind::InvalidState,
                "Probe outcome already assigned",
                format!("{} was already resolved as {outcome:?}", self.marker)
            );
        }

        self.observed_at = poll.observed_at;
        self.outcome = Some(poll.outcome);
        self.polls = poll.polls;
        self.poll_errors = poll.poll_errors;

        Ok(())
    }

    pub fn outcome(&self) -> Option<ProbeOutcome> {
        self.outcome
    }

    pub fn latency(&self) -> Option<Duration> {
        self.outcome.and_then(|outcome| outcome.latency())
    }

    pub fn observed_at(&self) -> Option<Instant> {
        self.observed_at
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn poll_errors(&self) -> u32 {
        self.poll_errors
    }
}

#[derive(Serialize)]
struct ProbeRecordView<'a> {
    marker: &'a str,
    table: Table,
    operation: Operation,
    key: u64,
    written_at: String,
    status: &'static str,
    latency_ms: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    waited_ms: Option<u128>,
    polls: u32,
    poll_errors: u32,
}

impl Serialize for ProbeRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let waited_ms = match self.outcome {
            Some(ProbeOutcome::Timeout { waited }) => Some(waited.as_millis()),
            _ => None,
        };

        ProbeRecordView {
            marker: &self.marker,
            table: self.table,
            operation: self.operation,
            key: self.key,
            written_at: self.written_at_wall.to_rfc3339(),
            status: self.outcome.map_or("pending", |outcome| outcome.label()),
            latency_ms: self.latency().map(|latency| latency.as_millis()),
            waited_ms,
            polls: self.polls,
            poll_errors: self.poll_errors,
        }
        .serialize(serializer)
    }
}

impl fmt::Display for ProbeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<20} {:<7} ", self.table, self.operation)?;
        match self.outcome {
            Some(ProbeOutcome::Synced { latency }) => {
                write!(f, "SYNCED   {:>8}ms", latency.as_millis())?
            }
            Some(ProbeOutcome::Timeout { waited }) => {
                write!(f, "TIMEOUT  after {}ms", waited.as_millis())?
            }
            None => write!(f, "PENDING")?,
        }
        write!(f, "  {} (key {})", self.marker, self.key)
    }
}

/// What a poll loop waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// At least one row matches.
    Present,
    /// No row matches.
    Absent,
    /// At least this many rows match.
    AtLeast(u64),
}

impl Expectation {
    fn is_met(&self, count: u64) -> bool {
        match self {
            Expectation::Present => count > 0,
            Expectation::Absent => count == 0,
            Expectation::AtLeast(expected) => count >= *expected,
        }
    }
}

/// Result of [`poll_target`].
#[derive(Debug, Clone, Copy)]
pub struct PollResult {
    pub outcome: ProbeOutcome,
    pub observed_at: Option<Instant>,
    /// Row count returned by the last successful poll.
    pub last_count: Option<u64>,
    pub polls: u32,
    pub poll_errors: u32,
}

/// Polls the target until `filter` meets `expectation` or the deadline passes.
///
/// The deadline and the latency are both measured from `written_at`. Failed polls are logged
/// and count as not yet visible.
pub async fn poll_target<T: TargetClient>(
    target: &T,
    table: Table,
    filter: &RowFilter,
    expectation: Expectation,
    written_at: Instant,
    config: &ProbeConfig,
) -> PollResult {
    let interval = config.check_interval();
    let max_wait = config.max_wait();
    let mut last_count = None;
    let mut polls = 0;
    let mut poll_errors = 0;

    loop {
        polls += 1;
        match target.count(table, filter).await {
            Ok(count) => {
                last_count = Some(count);
                if expectation.is_met(count) {
                    let observed_at = Instant::now();
                    return PollResult {
                        outcome: ProbeOutcome::Synced {
                            latency: observed_at.saturating_duration_since(written_at),
                        },
                        observed_at: Some(observed_at),
                        last_count,
                        polls,
                        poll_errors,
                    };
                }
            }
            Err(err) => {
                poll_errors += 1;
                warn!(%table, error = %err, "target poll failed, treating rows as not yet visible");
            }
        }

        let elapsed = written_at.elapsed();
        if elapsed >= max_wait {
            return PollResult {
                outcome: ProbeOutcome::Timeout { waited: elapsed },
                observed_at: None,
                last_count,
                polls,
                poll_errors,
            };
        }

        tokio::time::sleep(interval.min(max_wait - elapsed)).await;
    }
}

/// Measures insert, update and delete propagation one row at a time.
#[derive(Debug)]
pub struct LatencyProbe<S, T> {
    writer: RowWriter<S>,
    target: T,
    config: ProbeConfig,
}

impl<S, T> LatencyProbe<S, T>
where
    S: SourceClient,
    T: TargetClient,
{
    pub fn new(writer: RowWriter<S>, target: T, config: ProbeConfig) -> Self {
        Self {
            writer,
            target,
            config,
        }
    }

    pub fn writer(&mut self) -> &mut RowWriter<S> {
        &mut self.writer
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Polls the target until `filter` meets `expectation`, see [`poll_target`].
    pub async fn wait_visible(
        &self,
        table: Table,
        filter: &RowFilter,
        expectation: Expectation,
        written_at: Instant,
    ) -> PollResult {
        poll_target(&self.target, table, filter, expectation, written_at, &self.config).await
    }

    /// Inserts a marked row and waits for it on the target.
    pub async fn probe_insert(&mut self, table: Table) -> HarnessResult<ProbeRecord> {
        let inserted = self.writer.insert(table).await?;
        self.measure_insert(inserted).await
    }

    /// Like [`LatencyProbe::probe_insert`], for a row that is never used as a parent.
    ///
    /// The row can be deleted again once measured.
    pub async fn probe_transient_insert(&mut self, table: Table) -> HarnessResult<ProbeRecord> {
        let inserted = self.writer.insert_transient(table).await?;
        self.measure_insert(inserted).await
    }

    async fn measure_insert(&self, inserted: InsertedRow) -> HarnessResult<ProbeRecord> {
        let table = inserted.table();
        let mut record = self.issue(&inserted, Operation::Insert);

        let filter = self.presence_filter(&inserted);
        let poll = self
            .wait_visible(table, &filter, Expectation::Present, record.written_at)
            .await;
        record.resolve(poll)?;
        observe(&record);

        Ok(record)
    }

    /// Inserts a row, rewrites its mutable column and waits for the new value on the target.
    pub async fn probe_update(&mut self, table: Table) -> HarnessResult<ProbeRecord> {
        let inserted = self.writer.insert(table).await?;
        let presence = self.presence_filter(&inserted);
        let initial = self
            .wait_visible(table, &presence, Expectation::Present, inserted.written_at)
            .await;
        if !initial.outcome.is_synced() {
            warn!(%table, marker = %inserted.marker(), "inserted row not visible before update, measuring anyway");
        }

        let spec = self.writer.schema().spec(table).clone();
        let (marker, value) = match spec.marker_column {
            Some(_) => {
                let marker = self.writer.markers().next(table);
                let value = spec.marker_value(&marker).unwrap_or(Value::Null);
                (marker, value)
            }
            None => {
                let quantity = UPDATED_QUANTITY_BASE + (inserted.key % 1_000_000) as i64;
                (inserted.marker().to_string(), Value::Int(quantity))
            }
        };

        let updated = self
            .writer
            .source()
            .update(table, inserted.key, spec.mutable_column, value.clone())
            .await?;
        let written_at = Instant::now();
        if updated == 0 {
            bail!(
                ErrorKind::InvalidState,
                "Updated row no longer exists on the source",
                format!("{table} key {}", inserted.key)
            );
        }

        let mut record =
            ProbeRecord::issued(marker, table, Operation::Update, inserted.key, written_at);
        let filter = RowFilter::KeyWithValue {
            key: inserted.key,
            column: spec.mutable_column,
            value,
        };
        let poll = self
            .wait_visible(table, &filter, Expectation::Present, written_at)
            .await;
        record.resolve(poll)?;
        observe(&record);

        Ok(record)
    }

    /// Inserts a row, confirms it on the target, deletes it and waits for its absence.
    ///
    /// The delete is only issued after the row was observed as synced, the settle wait has
    /// elapsed and a final target check still sees it. Otherwise an absent row could mean
    /// "never replicated" as well as "deleted", so the probe fails with
    /// [`ErrorKind::DeletePreconditionFailed`] instead.
    pub async fn probe_delete(&mut self, table: Table) -> HarnessResult<ProbeRecord> {
        let inserted = self.writer.insert_transient(table).await?;
        let presence = self.presence_filter(&inserted);

        let initial = self
            .wait_visible(table, &presence, Expectation::Present, inserted.written_at)
            .await;
        if let ProbeOutcome::Timeout { waited } = initial.outcome {
            bail!(
                ErrorKind::DeletePreconditionFailed,
                "Row to delete never reached the target",
                format!(
                    "{} (key {}) not visible after {}ms",
                    inserted.marker(),
                    inserted.key,
                    waited.as_millis()
                )
            );
        }

        tokio::time::sleep(self.config.delete_settle()).await;

        let visible = self.target.count(table, &presence).await.map_err(|err| {
            harness_error!(
                ErrorKind::DeletePreconditionFailed,
                "Target check before delete failed",
                format!("{}: {}", inserted.marker(), err.detail().unwrap_or(err.description())),
                source: err
            )
        })?;
        if visible == 0 {
            bail!(
                ErrorKind::DeletePreconditionFailed,
                "Row vanished from the target before delete",
                inserted.marker()
            );
        }

        let key_filter = RowFilter::Key(inserted.key);
        let deleted = self.writer.source().delete(table, &key_filter).await?;
        let written_at = Instant::now();
        debug!(%table, key = inserted.key, deleted, "deleted probe row on source");

        let mut record =
            ProbeRecord::issued(inserted.marker(), table, Operation::Delete, inserted.key, written_at);
        let poll = self
            .wait_visible(table, &key_filter, Expectation::Absent, written_at)
            .await;
        record.resolve(poll)?;
        observe(&record);

        Ok(record)
    }

    /// Inserts a correlated row in every table and polls all of them concurrently.
    ///
    /// The chain is a new customer and product, an order of that customer, an item of that
    /// order and product, and an inventory movement of that product.
    pub async fn probe_chain(&mut self) -> HarnessResult<Vec<ProbeRecord>> {
        let customer = self.writer.insert(Table::Customers).await?;
        let product = self.writer.insert(Table::Products).await?;
        let order = self
            .writer
            .insert_referencing(Table::Orders, &[(Table::Customers, customer.key)])
            .await?;
        let item = self
            .writer
            .insert_referencing(
                Table::OrderItems,
                &[(Table::Orders, order.key), (Table::Products, product.key)],
            )
            .await?;
        let movement = self
            .writer
            .insert_referencing(Table::InventoryMovements, &[(Table::Products, product.key)])
            .await?;

        let inserted = [customer, product, order, item, movement];
        let filters: Vec<RowFilter> = inserted
            .iter()
            .map(|row| self.presence_filter(row))
            .collect();
        let polls = join_all(inserted.iter().zip(&filters).map(|(row, filter)| {
            self.wait_visible(row.table(), filter, Expectation::Present, row.written_at)
        }))
        .await;

        let mut records = Vec::with_capacity(inserted.len());
        for (row, poll) in inserted.iter().zip(polls) {
            let mut record = self.issue(row, Operation::Insert);
            record.resolve(poll)?;
            observe(&record);
            records.push(record);
        }

        Ok(records)
    }

    fn issue(&self, inserted: &InsertedRow, operation: Operation) -> ProbeRecord {
        let mut record = ProbeRecord::issued(
            inserted.marker(),
            inserted.table(),
            operation,
            inserted.key,
            inserted.written_at,
        );
        record.written_at_wall = inserted.written_at_wall;
        record
    }

    /// Marker lookup for tables with a marker column, key lookup otherwise.
    fn presence_filter(&self, inserted: &InsertedRow) -> RowFilter {
        if self.writer.schema().spec(inserted.table()).has_marker() {
            RowFilter::Marker(inserted.marker().to_string())
        } else {
            RowFilter::Key(inserted.key)
        }
    }
}

/// Logs a resolved probe and records its metrics.
fn observe(record: &ProbeRecord) {
    let Some(outcome) = record.outcome() else {
        return;
    };

    counter!(
        CDC_PROBE_TOTAL,
        TABLE_LABEL => record.table.name(),
        OPERATION_LABEL => record.operation.as_str(),
        OUTCOME_LABEL => outcome.label()
    )
    .increment(1);

    match outcome {
        ProbeOutcome::Synced { latency } => {
            histogram!(
                CDC_PROBE_LATENCY_SECONDS,
                TABLE_LABEL => record.table.name(),
                OPERATION_LABEL => record.operation.as_str()
            )
            .record(latency.as_secs_f64());
            info!(
                table = %record.table,
                operation = %record.operation,
                marker = %record.marker,
                latency_ms = latency.as_millis() as u64,
                "probe synced"
            );
        }
        ProbeOutcome::Timeout { waited } => {
            warn!(
                table = %record.table,
                operation = %record.operation,
                marker = %record.marker,
                waited_ms = waited.as_millis() as u64,
                "probe timed out"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clients::memory::{MemoryPipeline, MemorySource, MemoryTarget};
    use crate::generator::{EntityGenerator, MarkerFactory, ParentKeyCache};
    use crate::types::EntitySchema;

    fn probe(pipeline: &MemoryPipeline) -> LatencyProbe<MemorySource, MemoryTarget> {
        let generator = EntityGenerator::with_seed(
            Arc::new(EntitySchema::standard()),
            Arc::new(MarkerFactory::with_salt("cdcb_", "test0001")),
            Arc::new(ParentKeyCache::new(100)),
            7,
        );
        LatencyProbe::new(
            RowWriter::new(pipeline.source(), generator),
            pipeline.target(),
            ProbeConfig {
                check_interval_ms: 1000,
                max_wait_secs: 60,
                delete_settle_ms: 2000,
            },
        )
    }

    fn pipeline(delay: Duration) -> MemoryPipeline {
        MemoryPipeline::new(Arc::new(EntitySchema::standard()), delay)
    }

    #[tokio::test(start_paused = true)]
    async fn insert_latency_is_bounded_by_one_poll_interval() {
        let pipeline = pipeline(Duration::from_secs(10));
        let mut probe = probe(&pipeline);

        let record = probe.probe_insert(Table::Customers).await.unwrap();
        let latency = record.latency().unwrap();
        assert!(latency >= Duration::from_secs(10));
        assert!(latency <= Duration::from_secs(11));
        assert_eq!(record.operation, Operation::Insert);
        assert!(record.marker.starts_with("cdcb_test0001_cu_"));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_pipeline_times_out_without_latency() {
        let pipeline = pipeline(Duration::from_millis(100));
        pipeline.set_stalled(true).await;
        let mut probe = probe(&pipeline);

        let record = probe.probe_insert(Table::Products).await.unwrap();
        assert_eq!(
            record.outcome(),
            Some(ProbeOutcome::Timeout {
                waited: Duration::from_secs(60)
            })
        );
        assert_eq!(record.latency(), None);
        assert!(record.to_string().contains("TIMEOUT"));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_failures_are_retried() {
        let pipeline = pipeline(Duration::ZERO);
        pipeline.fail_target_polls(3).await;
        let mut probe = probe(&pipeline);

        let record = probe.probe_insert(Table::Customers).await.unwrap();
        assert!(record.outcome().unwrap().is_synced());
        assert_eq!(record.poll_errors(), 3);
        assert_eq!(record.polls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn order_items_are_probed_by_key() {
        let pipeline = pipeline(Duration::from_secs(1));
        let mut probe = probe(&pipeline);

        let record = probe.probe_insert(Table::OrderItems).await.unwrap();
        assert!(record.outcome().unwrap().is_synced());
        assert_eq!(pipeline.target_rows(Table::OrderItems).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn update_waits_for_the_new_value() {
        let pipeline = pipeline(Duration::from_secs(2));
        let mut probe = probe(&pipeline);

        let record = probe.probe_update(Table::OrderItems).await.unwrap();
        assert_eq!(record.operation, Operation::Update);
        assert_eq!(record.latency(), Some(Duration::from_secs(2)));

        let rows = pipeline.target_rows(Table::OrderItems).await;
        let quantity = rows[0]
            .1
            .iter()
            .find(|field| field.column == "quantity")
            .and_then(|field| field.value.as_int())
            .unwrap();
        assert!(quantity >= UPDATED_QUANTITY_BASE);
    }

    #[tokio::test(start_paused = true)]
    async fn update_of_a_marked_table_switches_the_marker() {
        let pipeline = pipeline(Duration::from_secs(1));
        let mut probe = probe(&pipeline);

        let record = probe.probe_update(Table::Customers).await.unwrap();
        assert!(record.outcome().unwrap().is_synced());
        assert!(record.marker.ends_with("_2"));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_is_measured_after_the_row_synced() {
        let pipeline = pipeline(Duration::from_secs(3));
        let mut probe = probe(&pipeline);

        let record = probe.probe_delete(Table::Customers).await.unwrap();
        assert_eq!(record.operation, Operation::Delete);
        assert_eq!(record.latency(), Some(Duration::from_secs(3)));
        assert!(pipeline.target_rows(Table::Customers).await.is_empty());
        assert!(pipeline.source_rows(Table::Customers).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_of_a_never_synced_row_is_a_precondition_failure() {
        let pipeline = pipeline(Duration::ZERO);
        pipeline.set_stalled(true).await;
        let mut probe = probe(&pipeline);

        let err = probe.probe_delete(Table::Products).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeletePreconditionFailed);
        // The source row is left alone.
        assert_eq!(pipeline.source_rows(Table::Products).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn chain_probes_every_table_concurrently() {
        let pipeline = pipeline(Duration::from_secs(5));
        let mut probe = probe(&pipeline);

        let started = Instant::now();
        let records = probe.probe_chain().await.unwrap();
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|record| record.latency() == Some(Duration::from_secs(5))));
        assert_eq!(started.elapsed(), Duration::from_secs(5));

        let order_items = pipeline.source_rows(Table::OrderItems).await;
        let orders = pipeline.source_rows(Table::Orders).await;
        assert_eq!(orders.len(), 1);
        let order_id = order_items[0]
            .1
            .iter()
            .find(|field| field.column == "order_id")
            .and_then(|field| field.value.as_int())
            .unwrap();
        assert_eq!(order_id as u64, orders[0].0);
    }

    #[test]
    fn outcome_is_assigned_once() {
        let mut record = ProbeRecord::issued("m", Table::Orders, Operation::Insert, 1, Instant::now());
        let poll = PollResult {
            outcome: ProbeOutcome::Synced {
                latency: Duration::from_millis(5),
            },
            observed_at: Some(Instant::now()),
            last_count: Some(1),
            polls: 1,
            poll_errors: 0,
        };

        record.resolve(poll).unwrap();
        let err = record.resolve(poll).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(record.latency(), Some(Duration::from_millis(5)));
    }
}

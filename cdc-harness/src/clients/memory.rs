use std::collections::{BTreeMap, HashSet, VecDeque};
use std::num::NonZeroI32;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::bail;
use crate::clients::{
    InsertedKeys, SchemaExecutor, SourceClient, TargetClient, check_batch_parameters,
};
use crate::error::{ErrorKind, HarnessResult};
use crate::types::{Binding, EntitySchema, Field, GeneratedRow, RowFilter, Table, Value};

/// Version reported by the simulated source, MySQL 8.0.35.
const MEMORY_SERVER_VERSION: i32 = 80035;

type Rows = BTreeMap<u64, Vec<Field>>;

#[derive(Debug, Clone)]
enum Change {
    Upsert {
        table: Table,
        key: u64,
        fields: Vec<Field>,
    },
    Delete {
        table: Table,
        key: u64,
    },
}

#[derive(Debug)]
struct PendingChange {
    visible_at: Instant,
    change: Change,
}

#[derive(Debug)]
struct Inner {
    schema: Arc<EntitySchema>,
    delay: Duration,
    source: BTreeMap<Table, Rows>,
    target: BTreeMap<Table, Rows>,
    pending: VecDeque<PendingChange>,
    next_keys: BTreeMap<Table, u64>,
    stalled: bool,
    source_down: bool,
    target_poll_failures: u32,
    failing_deletes: HashSet<Table>,
    alive_backends: usize,
    source_statements: Vec<String>,
    target_statements: Vec<String>,
}

impl Inner {
    /// Applies every change whose replication delay has elapsed, unless the pipeline is stalled.
    fn replicate(&mut self) {
        if self.stalled {
            return;
        }

        let now = Instant::now();
        while self
            .pending
            .front()
            .is_some_and(|pending| pending.visible_at <= now)
        {
            let Some(pending) = self.pending.pop_front() else {
                break;
            };

            match pending.change {
                Change::Upsert { table, key, fields } => {
                    self.target.entry(table).or_default().insert(key, fields);
                }
                Change::Delete { table, key } => {
                    if let Some(rows) = self.target.get_mut(&table) {
                        rows.remove(&key);
                    }
                }
            }
        }
    }

    fn capture(&mut self, change: Change) {
        self.pending.push_back(PendingChange {
            visible_at: Instant::now() + self.delay,
            change,
        });
    }

    fn check_source(&self) -> HarnessResult<()> {
        if self.source_down {
            bail!(
                ErrorKind::SourceConnectionFailed,
                "Source query failed",
                "simulated source is down"
            );
        }

        Ok(())
    }

    fn check_target(&mut self) -> HarnessResult<()> {
        if self.target_poll_failures > 0 {
            self.target_poll_failures -= 1;
            bail!(
                ErrorKind::TargetConnectionFailed,
                "Target query failed",
                "simulated target connection reset"
            );
        }

        self.replicate();
        Ok(())
    }

    /// Rejects rows referencing keys missing on the source, like a strict foreign key.
    fn check_references(&self, row: &GeneratedRow) -> HarnessResult<()> {
        let spec = self.schema.spec(row.table);
        for foreign_key in spec.foreign_keys {
            let Some(key) = row.value(foreign_key.column).and_then(Value::as_int) else {
                bail!(
                    ErrorKind::SourceQueryFailed,
                    "Source query failed",
                    format!("{}.{} cannot be null", row.table, foreign_key.column)
                );
            };

            let exists = self
                .source
                .get(&foreign_key.references)
                .is_some_and(|rows| rows.contains_key(&(key as u64)));
            if !exists {
                bail!(
                    ErrorKind::SourceQueryFailed,
                    "Source query failed",
                    format!(
                        "cannot add or update a child row: {}.{} = {key} has no parent in {}",
                        row.table, foreign_key.column, foreign_key.references
                    )
                );
            }
        }

        Ok(())
    }

    fn insert_row(&mut self, row: &GeneratedRow) -> u64 {
        let next = self.next_keys.entry(row.table).or_insert(1);
        let key = *next;
        *next += 1;

        self.source
            .entry(row.table)
            .or_default()
            .insert(key, row.fields.clone());
        self.capture(Change::Upsert {
            table: row.table,
            key,
            fields: row.fields.clone(),
        });

        key
    }

    fn matching_keys(
        &self,
        side: &BTreeMap<Table, Rows>,
        table: Table,
        filter: &RowFilter,
    ) -> HarnessResult<Vec<u64>> {
        // Same validation as the SQL clients.
        filter.to_predicate(&self.schema, table, Binding::Inline)?;

        let Some(rows) = side.get(&table) else {
            return Ok(Vec::new());
        };

        Ok(rows
            .iter()
            .filter(|(key, fields)| self.matches(side, table, **key, fields, filter))
            .map(|(key, _)| *key)
            .collect())
    }

    fn matches(
        &self,
        side: &BTreeMap<Table, Rows>,
        table: Table,
        key: u64,
        fields: &[Field],
        filter: &RowFilter,
    ) -> bool {
        let spec = self.schema.spec(table);
        let marker_text = || {
            spec.marker_column
                .and_then(|column| field_value(fields, column))
                .and_then(Value::as_text)
        };

        match filter {
            RowFilter::All => true,
            RowFilter::Marker(marker) => {
                spec.marker_value(marker).as_ref().and_then(Value::as_text) == marker_text()
            }
            RowFilter::MarkerPrefix(prefix) => {
                marker_text().is_some_and(|text| text.starts_with(prefix.as_str()))
            }
            RowFilter::Key(expected) => key == *expected,
            RowFilter::KeyRange { first, last } => (*first..=*last).contains(&key),
            RowFilter::KeyWithValue {
                key: expected,
                column,
                value,
            } => key == *expected && field_value(fields, column) == Some(value),
            RowFilter::ParentMarkerPrefix { parent, prefix } => {
                let parent_spec = self.schema.spec(*parent);
                let (Some(foreign_key), Some(marker_column)) =
                    (spec.reference_to(*parent), parent_spec.marker_column)
                else {
                    return false;
                };

                field_value(fields, foreign_key.column)
                    .and_then(Value::as_int)
                    .and_then(|parent_key| side.get(parent)?.get(&(parent_key as u64)))
                    .and_then(|parent_fields| field_value(parent_fields, marker_column))
                    .and_then(Value::as_text)
                    .is_some_and(|text| text.starts_with(prefix.as_str()))
            }
        }
    }
}

fn field_value<'a>(fields: &'a [Field], column: &str) -> Option<&'a Value> {
    fields
        .iter()
        .find(|field| field.column == column)
        .map(|field| &field.value)
}

/// In-process simulation of a source, a replication pipeline and a target.
///
/// Every write to the [`MemorySource`] becomes visible on the [`MemoryTarget`] once the
/// replication delay has elapsed, measured with [`tokio::time::Instant`] so paused-time
/// tests run instantly. The source enforces foreign keys like a strict MySQL server.
///
/// The pipeline can be stalled, and target reads or source deletes can be made to fail,
/// to exercise timeout and partial failure handling.
#[derive(Debug, Clone)]
pub struct MemoryPipeline {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryPipeline {
    pub fn new(schema: Arc<EntitySchema>, delay: Duration) -> Self {
        let inner = Inner {
            schema,
            delay,
            source: BTreeMap::new(),
            target: BTreeMap::new(),
            pending: VecDeque::new(),
            next_keys: BTreeMap::new(),
            stalled: false,
            source_down: false,
            target_poll_failures: 0,
            failing_deletes: HashSet::new(),
            alive_backends: 1,
            source_statements: Vec::new(),
            target_statements: Vec::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn source(&self) -> MemorySource {
        MemorySource {
            inner: self.inner.clone(),
        }
    }

    pub fn target(&self) -> MemoryTarget {
        MemoryTarget {
            inner: self.inner.clone(),
        }
    }

    /// Stops or resumes replication; captured changes are kept while stalled.
    pub async fn set_stalled(&self, stalled: bool) {
        info!(stalled, "memory pipeline replication toggled");
        self.inner.lock().await.stalled = stalled;
    }

    pub async fn set_replication_delay(&self, delay: Duration) {
        self.inner.lock().await.delay = delay;
    }

    pub async fn set_source_down(&self, down: bool) {
        self.inner.lock().await.source_down = down;
    }

    /// Makes the next `count` target reads fail with a connection error.
    pub async fn fail_target_polls(&self, count: u32) {
        self.inner.lock().await.target_poll_failures = count;
    }

    /// Makes every source delete on `table` fail.
    pub async fn fail_deletes(&self, table: Table) {
        self.inner.lock().await.failing_deletes.insert(table);
    }

    pub async fn set_alive_backends(&self, count: usize) {
        self.inner.lock().await.alive_backends = count;
    }

    /// Returns the rows currently stored on the source for `table`.
    pub async fn source_rows(&self, table: Table) -> Vec<(u64, Vec<Field>)> {
        let inner = self.inner.lock().await;
        inner
            .source
            .get(&table)
            .map(|rows| rows.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default()
    }

    /// Returns the rows currently visible on the target for `table`.
    pub async fn target_rows(&self, table: Table) -> Vec<(u64, Vec<Field>)> {
        let mut inner = self.inner.lock().await;
        inner.replicate();
        inner
            .target
            .get(&table)
            .map(|rows| rows.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default()
    }

    /// Returns the schema statements executed on the source and the target.
    pub async fn executed_statements(&self) -> (Vec<String>, Vec<String>) {
        let inner = self.inner.lock().await;
        (
            inner.source_statements.clone(),
            inner.target_statements.clone(),
        )
    }
}

/// Source side of a [`MemoryPipeline`].
#[derive(Debug, Clone)]
pub struct MemorySource {
    inner: Arc<Mutex<Inner>>,
}

impl SourceClient for MemorySource {
    async fn ping(&self) -> HarnessResult<()> {
        self.inner.lock().await.check_source()
    }

    async fn server_version(&self) -> HarnessResult<Option<NonZeroI32>> {
        self.inner.lock().await.check_source()?;

        Ok(NonZeroI32::new(MEMORY_SERVER_VERSION))
    }

    async fn insert(&self, row: &GeneratedRow) -> HarnessResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_source()?;
        inner.check_references(row)?;

        Ok(inner.insert_row(row))
    }

    async fn insert_batch(&self, rows: &[GeneratedRow]) -> HarnessResult<InsertedKeys> {
        let mut inner = self.inner.lock().await;
        inner.check_source()?;

        let Some(first) = rows.first() else {
            bail!(ErrorKind::InvalidData, "Cannot insert an empty batch");
        };
        if rows.iter().any(|row| row.table != first.table) {
            bail!(ErrorKind::InvalidData, "Batch rows must share table and columns");
        }
        check_batch_parameters(rows)?;
        // The statement is atomic: every row is checked before any is stored.
        for row in rows {
            inner.check_references(row)?;
        }

        let first_key = rows
            .iter()
            .map(|row| inner.insert_row(row))
            .min()
            .unwrap_or_default();
        debug!(table = %first.table, rows = rows.len(), "inserted batch on memory source");

        Ok(InsertedKeys {
            first: first_key,
            count: rows.len() as u64,
        })
    }

    async fn update(
        &self,
        table: Table,
        key: u64,
        column: &'static str,
        value: Value,
    ) -> HarnessResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_source()?;

        let Some(fields) = inner
            .source
            .get_mut(&table)
            .and_then(|rows| rows.get_mut(&key))
        else {
            return Ok(0);
        };

        match fields.iter_mut().find(|field| field.column == column) {
            Some(field) => field.value = value,
            None => fields.push(Field { column, value }),
        }
        let fields = fields.clone();
        inner.capture(Change::Upsert { table, key, fields });

        Ok(1)
    }

    async fn delete(&self, table: Table, filter: &RowFilter) -> HarnessResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_source()?;
        if inner.failing_deletes.contains(&table) {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Source query failed",
                format!("simulated delete failure on {table}")
            );
        }

        let keys = inner.matching_keys(&inner.source, table, filter)?;

        // Referenced rows cannot be deleted, the whole statement fails.
        for child in inner.schema.children_of(table) {
            let Some(foreign_key) = inner.schema.spec(child).reference_to(table) else {
                continue;
            };
            let referenced = inner.source.get(&child).is_some_and(|rows| {
                rows.values().any(|fields| {
                    field_value(fields, foreign_key.column)
                        .and_then(Value::as_int)
                        .is_some_and(|parent| keys.contains(&(parent as u64)))
                })
            });
            if referenced {
                bail!(
                    ErrorKind::SourceQueryFailed,
                    "Source query failed",
                    format!(
                        "cannot delete or update a parent row: {child}.{} references {table}",
                        foreign_key.column
                    )
                );
            }
        }

        if let Some(rows) = inner.source.get_mut(&table) {
            for key in &keys {
                rows.remove(key);
            }
        }
        for key in &keys {
            inner.capture(Change::Delete { table, key: *key });
        }

        Ok(keys.len() as u64)
    }

    async fn count(&self, table: Table, filter: &RowFilter) -> HarnessResult<u64> {
        let inner = self.inner.lock().await;
        inner.check_source()?;

        Ok(inner.matching_keys(&inner.source, table, filter)?.len() as u64)
    }
}

impl SchemaExecutor for MemorySource {
    async fn execute_statement(&self, statement: &str) -> HarnessResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_source()?;
        inner.source_statements.push(statement.to_string());

        Ok(())
    }
}

/// Target side of a [`MemoryPipeline`].
#[derive(Debug, Clone)]
pub struct MemoryTarget {
    inner: Arc<Mutex<Inner>>,
}

impl TargetClient for MemoryTarget {
    async fn ping(&self) -> HarnessResult<()> {
        self.inner.lock().await.check_target()
    }

    async fn count(&self, table: Table, filter: &RowFilter) -> HarnessResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_target()?;

        Ok(inner.matching_keys(&inner.target, table, filter)?.len() as u64)
    }

    async fn observed_keys(&self, table: Table, keys: &[u64]) -> HarnessResult<Vec<u64>> {
        let mut inner = self.inner.lock().await;
        inner.check_target()?;

        let Some(rows) = inner.target.get(&table) else {
            return Ok(Vec::new());
        };

        Ok(keys
            .iter()
            .copied()
            .filter(|key| rows.contains_key(key))
            .collect())
    }

    async fn alive_backends(&self) -> HarnessResult<usize> {
        let mut inner = self.inner.lock().await;
        inner.check_target()?;

        Ok(inner.alive_backends)
    }

    fn supports_delete(&self) -> bool {
        true
    }

    async fn delete(&self, table: Table, filter: &RowFilter) -> HarnessResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_target()?;

        let keys = inner.matching_keys(&inner.target, table, filter)?;
        if let Some(rows) = inner.target.get_mut(&table) {
            for key in &keys {
                rows.remove(key);
            }
        }

        Ok(keys.len() as u64)
    }
}

impl SchemaExecutor for MemoryTarget {
    async fn execute_statement(&self, statement: &str) -> HarnessResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_target()?;
        inner.target_statements.push(statement.to_string());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(delay: Duration) -> MemoryPipeline {
        MemoryPipeline::new(Arc::new(EntitySchema::standard()), delay)
    }

    fn customer(marker: &str) -> GeneratedRow {
        GeneratedRow {
            table: Table::Customers,
            marker: marker.to_string(),
            fields: vec![Field::new("email", format!("{marker}@cdc-bench.local"))],
            parents: vec![],
        }
    }

    fn order(marker: &str, customer_id: u64) -> GeneratedRow {
        GeneratedRow {
            table: Table::Orders,
            marker: marker.to_string(),
            fields: vec![
                Field::new("customer_id", customer_id),
                Field::new("shipping_address", marker),
            ],
            parents: vec![(Table::Customers, customer_id)],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rows_become_visible_after_the_delay() {
        let pipeline = pipeline(Duration::from_secs(3));
        let key = pipeline.source().insert(&customer("m1")).await.unwrap();
        let target = pipeline.target();

        assert!(target.observed_keys(Table::Customers, &[key]).await.unwrap().is_empty());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(
            target.observed_keys(Table::Customers, &[key]).await.unwrap(),
            vec![key]
        );
        assert_eq!(
            target
                .count(Table::Customers, &RowFilter::Marker("m1".to_string()))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_pipeline_never_replicates() {
        let pipeline = pipeline(Duration::from_millis(10));
        pipeline.set_stalled(true).await;
        pipeline.source().insert(&customer("m1")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(pipeline.target_rows(Table::Customers).await.is_empty());
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let pipeline = pipeline(Duration::ZERO);
        let source = pipeline.source();

        let err = source.insert(&order("o1", 99)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceQueryFailed);

        let customer_id = source.insert(&customer("c1")).await.unwrap();
        source.insert(&order("o1", customer_id)).await.unwrap();

        let err = source
            .delete(Table::Customers, &RowFilter::Key(customer_id))
            .await
            .unwrap_err();
        assert!(err.detail().unwrap().contains("orders.customer_id"));
    }

    #[tokio::test]
    async fn batch_keys_are_consecutive() {
        let pipeline = pipeline(Duration::ZERO);
        let source = pipeline.source();
        source.insert(&customer("first")).await.unwrap();

        let keys = source
            .insert_batch(&[customer("a"), customer("b"), customer("c")])
            .await
            .unwrap();
        assert_eq!(keys, InsertedKeys { first: 2, count: 3 });
    }

    #[tokio::test]
    async fn target_failures_are_injected() {
        let pipeline = pipeline(Duration::ZERO);
        pipeline.fail_target_polls(1).await;
        let target = pipeline.target();

        let err = target.ping().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TargetConnectionFailed);
        assert!(target.ping().await.is_ok());
    }
}

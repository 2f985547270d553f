use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::debug;

use crate::clients::{InsertedKeys, SourceClient};
use crate::error::HarnessResult;
use crate::generator::{EntityGenerator, MarkerFactory};
use crate::types::{EntitySchema, GeneratedRow, Table};

/// A row whose insertion was confirmed by the source.
#[derive(Debug, Clone)]
pub struct InsertedRow {
    pub row: GeneratedRow,
    pub key: u64,
    /// Completion time of the insert, the start of every latency measurement.
    pub written_at: Instant,
    pub written_at_wall: DateTime<Utc>,
    /// Ancestors inserted first because no confirmed key existed for their table.
    pub created_parents: Vec<(Table, u64)>,
}

impl InsertedRow {
    pub fn table(&self) -> Table {
        self.row.table
    }

    pub fn marker(&self) -> &str {
        &self.row.marker
    }
}

/// A confirmed multi-row insert.
#[derive(Debug, Clone)]
pub struct InsertedBatch {
    pub table: Table,
    pub marker_prefix: String,
    pub keys: InsertedKeys,
    pub written_at: Instant,
    pub insert_duration: Duration,
}

/// Inserts generated rows on the source, parents first.
///
/// Keys of confirmed single-row inserts are recorded in the parent cache so that later
/// dependent rows can reference them. Each worker owns its writer; writes of one writer are
/// strictly sequential.
#[derive(Debug)]
pub struct RowWriter<S> {
    source: S,
    generator: EntityGenerator,
}

impl<S> RowWriter<S>
where
    S: SourceClient,
{
    pub fn new(source: S, generator: EntityGenerator) -> Self {
        Self { source, generator }
    }

    /// Returns a writer for another worker sharing the run's markers and parent cache.
    pub fn fork(&mut self) -> Self {
        Self {
            source: self.source.clone(),
            generator: self.generator.fork(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn generator(&mut self) -> &mut EntityGenerator {
        &mut self.generator
    }

    pub fn schema(&self) -> &EntitySchema {
        self.generator.schema()
    }

    pub fn markers(&self) -> &MarkerFactory {
        self.generator.markers()
    }

    /// Inserts one row of every ancestor of `table` whose confirmed key cache is empty.
    ///
    /// Ancestors are inserted in insert order, so each of them finds its own parents.
    pub async fn ensure_parents(&mut self, table: Table) -> HarnessResult<Vec<(Table, u64)>> {
        let ancestors = self.generator.schema().ancestors(table);
        let mut created = Vec::new();

        for ancestor in ancestors {
            if !self.generator.parents().is_empty(ancestor) {
                continue;
            }

            let row = self.generator.next(ancestor)?;
            let key = self.source.insert(&row).await?;
            self.generator.parents().record(ancestor, key);
            debug!(table = %ancestor, key, marker = %row.marker, "seeded parent row");
            created.push((ancestor, key));
        }

        Ok(created)
    }

    /// Inserts a row of `table` and records its key as a parent.
    pub async fn insert(&mut self, table: Table) -> HarnessResult<InsertedRow> {
        self.insert_with(table, &[], true).await
    }

    /// Inserts a row of `table` without offering it as a parent.
    ///
    /// Used for rows that are deleted again by the harness, which must never be referenced.
    pub async fn insert_transient(&mut self, table: Table) -> HarnessResult<InsertedRow> {
        self.insert_with(table, &[], false).await
    }

    /// Inserts a row of `table` referencing the given parents where possible.
    pub async fn insert_referencing(
        &mut self,
        table: Table,
        parents: &[(Table, u64)],
    ) -> HarnessResult<InsertedRow> {
        self.insert_with(table, parents, true).await
    }

    async fn insert_with(
        &mut self,
        table: Table,
        parents: &[(Table, u64)],
        record: bool,
    ) -> HarnessResult<InsertedRow> {
        let created_parents = self.ensure_parents(table).await?;
        let row = self.generator.next_referencing(table, parents)?;

        let key = self.source.insert(&row).await?;
        let written_at = Instant::now();
        let written_at_wall = Utc::now();

        if record && self.generator.schema().children_of(table).next().is_some() {
            self.generator.parents().record(table, key);
        }
        debug!(%table, key, marker = %row.marker, "inserted row on source");

        Ok(InsertedRow {
            row,
            key,
            written_at,
            written_at_wall,
            created_parents,
        })
    }

    /// Inserts `count` rows of `table` with a single statement.
    ///
    /// Batch rows are not recorded as parents.
    pub async fn insert_batch(&mut self, table: Table, count: usize) -> HarnessResult<InsertedBatch> {
        self.ensure_parents(table).await?;
        let batch = self.generator.next_batch(table, count)?;

        let started = Instant::now();
        let keys = self.source.insert_batch(&batch.rows).await?;
        let written_at = Instant::now();
        debug!(%table, rows = keys.count, first_key = keys.first, "inserted batch on source");

        Ok(InsertedBatch {
            table,
            marker_prefix: batch.marker_prefix,
            keys,
            written_at,
            insert_duration: written_at.duration_since(started),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clients::memory::{MemoryPipeline, MemorySource};
    use crate::generator::ParentKeyCache;

    fn writer(pipeline: &MemoryPipeline, cache: Arc<ParentKeyCache>) -> RowWriter<MemorySource> {
        let generator = EntityGenerator::with_seed(
            Arc::new(EntitySchema::standard()),
            Arc::new(MarkerFactory::new("cdcb_")),
            cache,
            11,
        );
        RowWriter::new(pipeline.source(), generator)
    }

    #[tokio::test]
    async fn inserting_a_child_seeds_every_ancestor() {
        let pipeline = MemoryPipeline::new(Arc::new(EntitySchema::standard()), Duration::ZERO);
        let cache = Arc::new(ParentKeyCache::new(10));
        let mut writer = writer(&pipeline, cache.clone());

        let inserted = writer.insert(Table::OrderItems).await.unwrap();
        let created: Vec<_> = inserted.created_parents.iter().map(|(t, _)| *t).collect();
        assert_eq!(created, vec![Table::Customers, Table::Products, Table::Orders]);
        assert_eq!(pipeline.source_rows(Table::OrderItems).await.len(), 1);

        // Leaf rows are not offered as parents.
        assert!(cache.is_empty(Table::OrderItems));

        let again = writer.insert(Table::OrderItems).await.unwrap();
        assert!(again.created_parents.is_empty());
    }

    #[tokio::test]
    async fn transient_rows_are_not_cached() {
        let pipeline = MemoryPipeline::new(Arc::new(EntitySchema::standard()), Duration::ZERO);
        let cache = Arc::new(ParentKeyCache::new(10));
        let mut writer = writer(&pipeline, cache.clone());

        writer.insert_transient(Table::Customers).await.unwrap();
        assert!(cache.is_empty(Table::Customers));

        writer.insert(Table::Customers).await.unwrap();
        assert_eq!(cache.len(Table::Customers), 1);
    }

    #[tokio::test]
    async fn batches_report_consecutive_keys() {
        let pipeline = MemoryPipeline::new(Arc::new(EntitySchema::standard()), Duration::ZERO);
        let mut writer = writer(&pipeline, Arc::new(ParentKeyCache::new(10)));

        let batch = writer.insert_batch(Table::Orders, 5).await.unwrap();
        assert_eq!(batch.keys.count, 5);
        assert_eq!(pipeline.source_rows(Table::Orders).await.len(), 5);
        assert_eq!(pipeline.source_rows(Table::Customers).await.len(), 1);
    }
}

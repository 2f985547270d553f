//! Synthetic, referentially valid rows for the commerce schema.
//!
//! The generator never talks to a database. Dependent rows reference keys taken from the
//! [`ParentKeyCache`], which only holds keys whose insertion was confirmed on the source;
//! callers seed parent tables first.

mod cache;
pub(crate) mod factories;
mod marker;

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;

pub use cache::ParentKeyCache;
pub use marker::MarkerFactory;

use crate::error::{ErrorKind, HarnessResult};
use crate::types::{EntitySchema, Field, GeneratedBatch, GeneratedRow, Table};
use crate::{bail, harness_error};

/// Produces [`GeneratedRow`] values for any table.
///
/// Each worker owns its generator; [`EntityGenerator::fork`] creates one sharing the schema,
/// the marker sequences and the parent cache but with its own random source.
#[derive(Debug)]
pub struct EntityGenerator {
    schema: Arc<EntitySchema>,
    markers: Arc<MarkerFactory>,
    parents: Arc<ParentKeyCache>,
    rng: StdRng,
}

impl EntityGenerator {
    pub fn new(
        schema: Arc<EntitySchema>,
        markers: Arc<MarkerFactory>,
        parents: Arc<ParentKeyCache>,
    ) -> Self {
        Self {
            schema,
            markers,
            parents,
            rng: StdRng::from_rng(&mut rand::rng()),
        }
    }

    /// Creates a generator with a deterministic random source.
    pub fn with_seed(
        schema: Arc<EntitySchema>,
        markers: Arc<MarkerFactory>,
        parents: Arc<ParentKeyCache>,
        seed: u64,
    ) -> Self {
        Self {
            schema,
            markers,
            parents,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns a generator for another worker of the same run.
    pub fn fork(&mut self) -> Self {
        Self {
            schema: self.schema.clone(),
            markers: self.markers.clone(),
            parents: self.parents.clone(),
            rng: StdRng::from_rng(&mut self.rng),
        }
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn markers(&self) -> &Arc<MarkerFactory> {
        &self.markers
    }

    pub fn parents(&self) -> &Arc<ParentKeyCache> {
        &self.parents
    }

    /// Generates one row of `table` with a fresh marker.
    ///
    /// Fails with [`ErrorKind::NoParentAvailable`] when a referenced table has no confirmed key.
    pub fn next(&mut self, table: Table) -> HarnessResult<GeneratedRow> {
        self.next_referencing(table, &[])
    }

    /// Generates one row of `table`, referencing the given parent keys where it has a foreign
    /// key to their table and cached keys elsewhere.
    pub fn next_referencing(
        &mut self,
        table: Table,
        parents: &[(Table, u64)],
    ) -> HarnessResult<GeneratedRow> {
        let marker = self.markers.next(table);
        self.build_row(table, marker, parents)
    }

    /// Generates `count` rows of `table` sharing a batch marker prefix.
    pub fn next_batch(&mut self, table: Table, count: usize) -> HarnessResult<GeneratedBatch> {
        if count == 0 {
            bail!(ErrorKind::InvalidData, "Batch size must be positive");
        }

        let (marker_prefix, markers) = self.markers.next_batch(table, count);
        let rows = markers
            .into_iter()
            .map(|marker| self.build_row(table, marker, &[]))
            .collect::<HarnessResult<Vec<_>>>()?;

        Ok(GeneratedBatch {
            table,
            marker_prefix,
            rows,
        })
    }

    fn build_row(
        &mut self,
        table: Table,
        marker: String,
        fixed: &[(Table, u64)],
    ) -> HarnessResult<GeneratedRow> {
        let spec = self.schema.spec(table);

        let mut parents = Vec::with_capacity(spec.foreign_keys.len());
        let mut fields = Vec::new();
        for foreign_key in spec.foreign_keys {
            let fixed_key = fixed
                .iter()
                .find(|(parent, _)| *parent == foreign_key.references)
                .map(|(_, key)| *key);
            let key = fixed_key
                .or_else(|| self.parents.choose(foreign_key.references, &mut self.rng))
                .ok_or_else(|| {
                    harness_error!(
                        ErrorKind::NoParentAvailable,
                        "No confirmed parent key",
                        format!("{table} requires a confirmed {} row", foreign_key.references)
                    )
                })?;
            parents.push((foreign_key.references, key));
            fields.push(Field::new(foreign_key.column, key));
        }

        if let (Some(column), Some(value)) = (spec.marker_column, spec.marker_value(&marker)) {
            fields.push(Field { column, value });
        }
        fields.extend((spec.factory)(&marker, &mut self.rng));

        Ok(GeneratedRow {
            table,
            marker,
            fields,
            parents,
        })
    }
}

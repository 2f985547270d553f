use std::future::Future;
use std::num::NonZeroI32;

use crate::error::{ErrorKind, HarnessResult};
use crate::harness_error;
use crate::types::{GeneratedRow, RowFilter, Table, Value};

/// Keys assigned by the source to a multi-row insert.
///
/// The source reports the key of the first row; the remaining rows are assumed to have
/// consecutive keys, which holds for single-statement inserts into auto-increment tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertedKeys {
    pub first: u64,
    pub count: u64,
}

impl InsertedKeys {
    /// Returns the last assigned key, [`None`] for an empty insert.
    pub fn last(&self) -> Option<u64> {
        self.count.checked_sub(1).map(|offset| self.first + offset)
    }

    pub fn keys(&self) -> impl Iterator<Item = u64> {
        self.first..self.first + self.count
    }
}

/// Bind parameters MySQL accepts in a single prepared statement.
pub const MAX_BATCH_PARAMETERS: usize = 65_535;

/// Rejects a multi-row insert that would need more bind parameters than one statement allows.
///
/// Batches are never split: their keys are only known to be consecutive within one statement.
pub fn check_batch_parameters(rows: &[GeneratedRow]) -> HarnessResult<()> {
    let columns = rows.first().map_or(0, |row| row.fields.len());
    let parameters = rows.len().saturating_mul(columns);
    if parameters > MAX_BATCH_PARAMETERS {
        return Err(harness_error!(
            ErrorKind::InvalidData,
            "Batch needs more bind parameters than one statement allows",
            format!(
                "{} rows x {columns} columns = {parameters} parameters, at most {} rows fit",
                rows.len(),
                MAX_BATCH_PARAMETERS / columns
            )
        ));
    }

    Ok(())
}

/// Write access to the source of the pipeline.
///
/// Every write is confirmed once the returned future resolves, so keys it returns may be
/// referenced by dependent rows.
pub trait SourceClient: Clone + Send + Sync + 'static {
    /// Runs the trivial liveness query.
    fn ping(&self) -> impl Future<Output = HarnessResult<()>> + Send;

    /// Returns the numeric server version, see [`cdc_mysql::db::extract_server_version`].
    fn server_version(&self) -> impl Future<Output = HarnessResult<Option<NonZeroI32>>> + Send;

    /// Inserts one row and returns its assigned key.
    fn insert(&self, row: &GeneratedRow) -> impl Future<Output = HarnessResult<u64>> + Send;

    /// Inserts all rows with a single multi-row statement.
    ///
    /// Every row must belong to the same table and set the same columns.
    fn insert_batch(
        &self,
        rows: &[GeneratedRow],
    ) -> impl Future<Output = HarnessResult<InsertedKeys>> + Send;

    /// Sets `column` of the row with `key`, returning the affected row count.
    fn update(
        &self,
        table: Table,
        key: u64,
        column: &'static str,
        value: Value,
    ) -> impl Future<Output = HarnessResult<u64>> + Send;

    /// Deletes the matching rows, returning how many were removed.
    fn delete(
        &self,
        table: Table,
        filter: &RowFilter,
    ) -> impl Future<Output = HarnessResult<u64>> + Send;

    fn count(
        &self,
        table: Table,
        filter: &RowFilter,
    ) -> impl Future<Output = HarnessResult<u64>> + Send;
}

/// Read access to the target of the pipeline.
pub trait TargetClient: Clone + Send + Sync + 'static {
    fn ping(&self) -> impl Future<Output = HarnessResult<()>> + Send;

    fn count(
        &self,
        table: Table,
        filter: &RowFilter,
    ) -> impl Future<Output = HarnessResult<u64>> + Send;

    /// Returns the subset of `keys` present in `table`.
    fn observed_keys(
        &self,
        table: Table,
        keys: &[u64],
    ) -> impl Future<Output = HarnessResult<Vec<u64>>> + Send;

    /// Returns how many storage nodes the target reports as alive.
    fn alive_backends(&self) -> impl Future<Output = HarnessResult<usize>> + Send;

    /// Returns `true` if [`TargetClient::delete`] is supported.
    fn supports_delete(&self) -> bool {
        false
    }

    /// Deletes rows directly on the target, bypassing the pipeline.
    ///
    /// Unsupported unless overridden.
    fn delete(
        &self,
        table: Table,
        _filter: &RowFilter,
    ) -> impl Future<Output = HarnessResult<u64>> + Send {
        async move {
            Err(harness_error!(
                ErrorKind::UnsupportedOperation,
                "Target does not support direct deletion",
                table.to_string()
            ))
        }
    }
}

/// Executes schema statements on one side of the pipeline.
pub trait SchemaExecutor: Send + Sync {
    fn execute_statement(&self, statement: &str) -> impl Future<Output = HarnessResult<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_keys_are_consecutive() {
        let keys = InsertedKeys { first: 10, count: 3 };
        assert_eq!(keys.last(), Some(12));
        assert_eq!(keys.keys().collect::<Vec<_>>(), vec![10, 11, 12]);
        assert_eq!(InsertedKeys { first: 5, count: 0 }.last(), None);
    }
}

//! Removal of harness rows, children before parents.
//!
//! Rows are found by marker prefix and deleted on the source; the pipeline carries the deletes
//! to the target. Optionally the target is polled until the rows are gone there too, and
//! leftovers are deleted directly when the target allows it. Running cleanup again converges
//! towards zero remaining rows.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use cdc_config::shared::CleanupConfig;
use metrics::counter;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::clients::{SourceClient, TargetClient};
use crate::error::{ErrorKind, HarnessError, HarnessResult};
use crate::harness_error;
use crate::metrics::{CDC_CLEANUP_ROWS_REMOVED_TOTAL, TABLE_LABEL};
use crate::report::Failure;
use crate::types::{EntitySchema, RowFilter, Table};

/// Settings of one cleanup pass.
#[derive(Debug, Clone)]
pub struct CleanupOptions {
    pub prefixes: Vec<String>,
    /// How long to wait for the deletes to reach the target, [`None`] to not wait.
    pub wait_for_target: Option<Duration>,
    pub target_direct_delete: bool,
    /// Interval between two target checks while waiting.
    pub check_interval: Duration,
}

impl CleanupOptions {
    pub fn from_config(config: &CleanupConfig, check_interval: Duration) -> Self {
        Self {
            prefixes: config.marker_prefixes.clone(),
            wait_for_target: config.wait_for_target(),
            target_direct_delete: config.target_direct_delete,
            check_interval,
        }
    }

    /// Same options with other prefixes.
    pub fn with_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.prefixes = prefixes;
        self
    }
}

/// A table left alone because a table referencing it could not be cleaned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTable {
    pub table: Table,
    pub blocked_by: Table,
}

/// What a cleanup pass removed and what it left behind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub prefixes: Vec<String>,
    pub removed_from_source: BTreeMap<Table, u64>,
    /// Rows that disappeared from the target, only known when the pass waited for it.
    pub removed_from_target: Option<BTreeMap<Table, u64>>,
    pub failures: Vec<Failure>,
    pub skipped: Vec<SkippedTable>,
    /// Harness rows still present on the source, per table.
    pub residual: BTreeMap<Table, u64>,
    /// Harness rows still present on the target, only known when the pass waited for it.
    pub target_residual: Option<BTreeMap<Table, u64>>,
}

impl CleanupReport {
    pub fn total_removed_from_source(&self) -> u64 {
        self.removed_from_source.values().sum()
    }

    pub fn total_removed_from_target(&self) -> Option<u64> {
        self.removed_from_target
            .as_ref()
            .map(|removed| removed.values().sum())
    }

    /// Whether nothing failed and no harness row is left on either side.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
            && self.skipped.is_empty()
            && self.residual.values().all(|rows| *rows == 0)
            && self
                .target_residual
                .as_ref()
                .is_none_or(|residual| residual.values().all(|rows| *rows == 0))
    }

    /// Returns a [`ErrorKind::PartialCleanup`] error describing the residual, if incomplete.
    pub fn to_error(&self) -> Option<HarnessError> {
        if self.is_complete() {
            return None;
        }

        let residual: Vec<String> = self
            .residual
            .iter()
            .filter(|(_, rows)| **rows > 0)
            .map(|(table, rows)| format!("{table}={rows}"))
            .collect();

        Some(harness_error!(
            ErrorKind::PartialCleanup,
            "Cleanup left harness rows behind",
            format!(
                "{} failures, {} skipped tables, source residual [{}]",
                self.failures.len(),
                self.skipped.len(),
                residual.join(", ")
            )
        ))
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cleanup of prefixes [{}]", self.prefixes.join(", "))?;
        for table in Table::INSERT_ORDER.iter().rev() {
            let removed = self.removed_from_source.get(table).copied().unwrap_or_default();
            let residual = self.residual.get(table).copied().unwrap_or_default();
            write!(f, "{table:<20} removed {removed:>8}  residual {residual:>6}")?;
            if let Some(removed) = self.removed_from_target.as_ref().and_then(|r| r.get(table)) {
                write!(f, "  target removed {removed}")?;
            }
            writeln!(f)?;
        }
        for skipped in &self.skipped {
            writeln!(f, "{:<20} SKIPPED (cleanup of {} failed)", skipped.table, skipped.blocked_by)?;
        }
        for failure in &self.failures {
            writeln!(f, "{failure}")?;
        }
        write!(
            f,
            "{}: {} rows removed from source",
            if self.is_complete() { "complete" } else { "partial" },
            self.total_removed_from_source()
        )?;
        if let Some(removed) = self.total_removed_from_target() {
            write!(f, ", {removed} from target")?;
        }
        Ok(())
    }
}

/// Deletes every harness row matching `options.prefixes`, children first.
///
/// A failed table blocks the cleanup of the tables it references; both are reported. Never
/// returns early on a failure, the report lists everything that went wrong.
pub async fn cleanup<S, T>(
    source: &S,
    target: &T,
    schema: &EntitySchema,
    options: &CleanupOptions,
) -> CleanupReport
where
    S: SourceClient,
    T: TargetClient,
{
    let mut report = CleanupReport {
        prefixes: options.prefixes.clone(),
        ..Default::default()
    };

    let filters = match harness_filters(schema, &options.prefixes) {
        Ok(filters) => filters,
        Err(err) => {
            report
                .failures
                .push(Failure::new(Table::INSERT_ORDER[0], None, &err));
            return report;
        }
    };

    let target_before = match options.wait_for_target {
        Some(_) => Some(count_all(&Target(target), &filters, &mut report.failures).await),
        None => None,
    };

    let mut failed: BTreeSet<Table> = BTreeSet::new();
    for table in Table::cleanup_order() {
        if let Some(blocked_by) = schema.children_of(table).find(|child| failed.contains(child)) {
            warn!(%table, %blocked_by, "skipping cleanup, a referencing table failed");
            report.skipped.push(SkippedTable { table, blocked_by });
            failed.insert(table);
            continue;
        }

        let mut removed = 0;
        for filter in &filters[&table] {
            match source.delete(table, filter).await {
                Ok(rows) => removed += rows,
                Err(err) => {
                    warn!(%table, error = %err, "cleanup delete failed");
                    report.failures.push(Failure::new(table, None, &err));
                    failed.insert(table);
                    break;
                }
            }
        }

        if removed > 0 {
            counter!(CDC_CLEANUP_ROWS_REMOVED_TOTAL, TABLE_LABEL => table.name()).increment(removed);
            info!(%table, removed, "removed harness rows from source");
        }
        report.removed_from_source.insert(table, removed);
    }

    report.residual = count_all(&Source(source), &filters, &mut report.failures).await;

    if let (Some(wait), Some(before)) = (options.wait_for_target, target_before) {
        let mut after = wait_for_target(target, &filters, wait, options.check_interval).await;

        if options.target_direct_delete && after.values().any(|rows| *rows > 0) {
            delete_on_target(target, &filters, &mut after, &mut report.failures).await;
        }

        report.removed_from_target = Some(
            before
                .iter()
                .map(|(table, rows)| {
                    let left = after.get(table).copied().unwrap_or_default();
                    (*table, rows.saturating_sub(left))
                })
                .collect(),
        );
        report.target_residual = Some(after);
    }

    info!(
        removed = report.total_removed_from_source(),
        failures = report.failures.len(),
        skipped = report.skipped.len(),
        "cleanup finished"
    );

    report
}

type Filters = BTreeMap<Table, Vec<RowFilter>>;

fn harness_filters(schema: &EntitySchema, prefixes: &[String]) -> HarnessResult<Filters> {
    let mut filters = Filters::new();
    for table in Table::INSERT_ORDER {
        let table_filters = prefixes
            .iter()
            .map(|prefix| RowFilter::marker_prefix_for(schema, table, prefix.as_str()))
            .collect::<HarnessResult<Vec<_>>>()?;
        filters.insert(table, table_filters);
    }

    Ok(filters)
}

/// Counts matching rows per table; tables whose count fails are reported and left out.
async fn count_all<C>(
    counter: &C,
    filters: &Filters,
    failures: &mut Vec<Failure>,
) -> BTreeMap<Table, u64>
where
    C: RowCounter,
{
    let mut counts = BTreeMap::new();
    'tables: for (table, table_filters) in filters {
        let mut rows = 0;
        for filter in table_filters {
            match counter.count_rows(*table, filter).await {
                Ok(count) => rows += count,
                Err(err) => {
                    failures.push(Failure::new(*table, None, &err));
                    continue 'tables;
                }
            }
        }
        counts.insert(*table, rows);
    }

    counts
}

async fn wait_for_target<T: TargetClient>(
    target: &T,
    filters: &Filters,
    wait: Duration,
    check_interval: Duration,
) -> BTreeMap<Table, u64> {
    let started = Instant::now();
    loop {
        // Failed polls are retried until the deadline, only the final one is reported.
        let mut ignored = Vec::new();
        let counts = count_all(&Target(target), filters, &mut ignored).await;
        let clean = ignored.is_empty() && counts.values().all(|rows| *rows == 0);
        if clean || started.elapsed() >= wait {
            if !clean {
                warn!(
                    waited_ms = started.elapsed().as_millis() as u64,
                    "harness rows still present on target"
                );
            }
            return counts;
        }

        tokio::time::sleep(check_interval.min(wait.saturating_sub(started.elapsed()))).await;
    }
}

async fn delete_on_target<T: TargetClient>(
    target: &T,
    filters: &Filters,
    after: &mut BTreeMap<Table, u64>,
    failures: &mut Vec<Failure>,
) {
    if !target.supports_delete() {
        failures.push(Failure::new(
            Table::INSERT_ORDER[0],
            None,
            &harness_error!(
                ErrorKind::UnsupportedOperation,
                "Target does not support direct deletes"
            ),
        ));
        return;
    }

    for table in Table::cleanup_order() {
        if after.get(&table).copied().unwrap_or_default() == 0 {
            continue;
        }

        let mut removed = 0;
        for filter in &filters[&table] {
            match target.delete(table, filter).await {
                Ok(rows) => removed += rows,
                Err(err) => {
                    failures.push(Failure::new(table, None, &err));
                    break;
                }
            }
        }
        info!(%table, removed, "deleted leftover harness rows on target");

        if let Some(left) = after.get_mut(&table) {
            *left = left.saturating_sub(removed);
        }
    }
}

/// Row counting shared by both sides of the pipeline.
trait RowCounter {
    fn count_rows(
        &self,
        table: Table,
        filter: &RowFilter,
    ) -> impl Future<Output = HarnessResult<u64>> + Send;
}

struct Source<'a, S>(&'a S);

struct Target<'a, T>(&'a T);

impl<S: SourceClient> RowCounter for Source<'_, S> {
    async fn count_rows(&self, table: Table, filter: &RowFilter) -> HarnessResult<u64> {
        self.0.count(table, filter).await
    }
}

impl<T: TargetClient> RowCounter for Target<'_, T> {
    async fn count_rows(&self, table: Table, filter: &RowFilter) -> HarnessResult<u64> {
        self.0.count(table, filter).await
    }
}

use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::clients::{SourceClient, TargetClient};
use crate::report::{CountsReport, TableCounts, VerifyReport};
use crate::types::{RowFilter, Table};

/// Counts every row of every table on both sides.
///
/// A failed count is logged and shown as unknown; it does not hide the other tables.
pub async fn table_counts<S, T>(source: &S, target: &T) -> CountsReport
where
    S: SourceClient,
    T: TargetClient,
{
    let mut tables = Vec::with_capacity(Table::INSERT_ORDER.len());

    for table in Table::INSERT_ORDER {
        let (source_count, target_count) = tokio::join!(
            source.count(table, &RowFilter::All),
            target.count(table, &RowFilter::All)
        );

        let source_count = source_count
            .inspect_err(|err| warn!(%table, error = %err, "source count failed"))
            .ok();
        let target_count = target_count
            .inspect_err(|err| warn!(%table, error = %err, "target count failed"))
            .ok();

        tables.push(TableCounts {
            table,
            source: source_count,
            target: target_count,
        });
    }

    CountsReport { tables }
}

/// Compares counts every `interval` until the target caught up with the source on every
/// table, or `timeout` has passed.
pub async fn verify<S, T>(source: &S, target: &T, timeout: Duration, interval: Duration) -> VerifyReport
where
    S: SourceClient,
    T: TargetClient,
{
    let started = Instant::now();
    let mut checks = 0;

    loop {
        checks += 1;
        let counts = table_counts(source, target).await;
        let elapsed = started.elapsed();

        if counts.all_synced() {
            info!(checks, elapsed_ms = elapsed.as_millis() as u64, "target caught up");
            return VerifyReport {
                synced: true,
                checks,
                elapsed,
                counts,
            };
        }

        if elapsed >= timeout {
            warn!(checks, total_lag = counts.total_lag(), "target did not catch up");
            return VerifyReport {
                synced: false,
                checks,
                elapsed,
                counts,
            };
        }

        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

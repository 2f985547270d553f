use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::time::Instant;

use crate::metrics::{CDC_INSERT_ERRORS_TOTAL, CDC_ROWS_INSERTED_TOTAL, CDC_ROWS_SYNCED_TOTAL, TABLE_LABEL};
use crate::types::Table;

#[derive(Debug, Default)]
struct TableCounters {
    inserted: AtomicU64,
    synced: AtomicU64,
    errors: AtomicU64,
}

/// Live progress counters of one load run.
///
/// Workers are the only writers of `inserted` and `errors`, the sync tracker is the only
/// writer of `synced`. Readers take a [`CountersSnapshot`] at any time.
#[derive(Debug)]
pub struct LoadCounters {
    started_at: Instant,
    tables: [TableCounters; Table::INSERT_ORDER.len()],
}

impl LoadCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            tables: Default::default(),
        }
    }

    pub fn record_inserted(&self, table: Table, rows: u64) {
        self.tables[table.index()]
            .inserted
            .fetch_add(rows, Ordering::Relaxed);
        counter!(CDC_ROWS_INSERTED_TOTAL, TABLE_LABEL => table.name()).increment(rows);
    }

    pub fn record_synced(&self, table: Table, rows: u64) {
        self.tables[table.index()]
            .synced
            .fetch_add(rows, Ordering::Relaxed);
        counter!(CDC_ROWS_SYNCED_TOTAL, TABLE_LABEL => table.name()).increment(rows);
    }

    pub fn record_error(&self, table: Table) {
        self.tables[table.index()]
            .errors
            .fetch_add(1, Ordering::Relaxed);
        counter!(CDC_INSERT_ERRORS_TOTAL, TABLE_LABEL => table.name()).increment(1);
    }

    /// Rows inserted but not yet confirmed on the target, across all tables.
    pub fn lag(&self) -> u64 {
        self.tables
            .iter()
            .map(|counters| {
                counters
                    .inserted
                    .load(Ordering::Relaxed)
                    .saturating_sub(counters.synced.load(Ordering::Relaxed))
            })
            .sum()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let tables: Vec<TableSnapshot> = Table::INSERT_ORDER
            .iter()
            .map(|table| {
                let counters = &self.tables[table.index()];
                let inserted = counters.inserted.load(Ordering::Relaxed);
                let synced = counters.synced.load(Ordering::Relaxed);
                TableSnapshot {
                    table: *table,
                    inserted,
                    synced,
                    errors: counters.errors.load(Ordering::Relaxed),
                    lag: inserted.saturating_sub(synced),
                }
            })
            .collect();

        let elapsed = self.elapsed();
        let inserted = tables.iter().map(|t| t.inserted).sum();
        let synced = tables.iter().map(|t| t.synced).sum();
        let errors = tables.iter().map(|t| t.errors).sum();
        let secs = elapsed.as_secs_f64();

        CountersSnapshot {
            elapsed_ms: elapsed.as_millis() as u64,
            inserted,
            synced,
            errors,
            lag: tables.iter().map(|t| t.lag).sum(),
            insert_rate: if secs > 0.0 { inserted as f64 / secs } else { 0.0 },
            tables,
        }
    }
}

impl Default for LoadCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSnapshot {
    pub table: Table,
    pub inserted: u64,
    pub synced: u64,
    pub errors: u64,
    pub lag: u64,
}

/// Point-in-time copy of [`LoadCounters`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountersSnapshot {
    pub elapsed_ms: u64,
    pub inserted: u64,
    pub synced: u64,
    pub errors: u64,
    pub lag: u64,
    /// Rows per second since the run started.
    pub insert_rate: f64,
    pub tables: Vec<TableSnapshot>,
}

impl CountersSnapshot {
    /// Tables that saw any activity.
    pub fn active_tables(&self) -> impl Iterator<Item = &TableSnapshot> {
        self.tables
            .iter()
            .filter(|table| table.inserted > 0 || table.errors > 0)
    }
}

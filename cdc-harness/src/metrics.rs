//! Metric names and labels recorded by the harness.
//!
//! Values are recorded through the `metrics` facade; nothing is exported unless a recorder
//! has been installed by the binary.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

/// Label for the logical table name.
pub const TABLE_LABEL: &str = "table";

/// Label for the probed operation (insert, update, delete).
pub const OPERATION_LABEL: &str = "operation";

/// Label for a probe or readiness outcome.
pub const OUTCOME_LABEL: &str = "outcome";

/// Label for a readiness endpoint name.
pub const ENDPOINT_LABEL: &str = "endpoint";

/// Counter of finished probes by table, operation and outcome.
pub const CDC_PROBE_TOTAL: &str = "cdc_probe_total";

/// Histogram of propagation latencies of synced probes, in seconds.
pub const CDC_PROBE_LATENCY_SECONDS: &str = "cdc_probe_latency_seconds";

/// Counter of rows inserted on the source by the load controller.
pub const CDC_ROWS_INSERTED_TOTAL: &str = "cdc_rows_inserted_total";

/// Counter of inserted rows confirmed on the target.
pub const CDC_ROWS_SYNCED_TOTAL: &str = "cdc_rows_synced_total";

/// Counter of failed inserts.
pub const CDC_INSERT_ERRORS_TOTAL: &str = "cdc_insert_errors_total";

/// Gauge of rows inserted but not yet confirmed on the target.
pub const CDC_LOAD_LAG_ROWS: &str = "cdc_load_lag_rows";

/// Counter of readiness attempts by endpoint and outcome.
pub const CDC_READINESS_ATTEMPTS_TOTAL: &str = "cdc_readiness_attempts_total";

/// Counter of rows removed on the source by cleanup.
pub const CDC_CLEANUP_ROWS_REMOVED_TOTAL: &str = "cdc_cleanup_rows_removed_total";

/// Registers descriptions of every harness metric with the installed recorder.
///
/// Safe to call multiple times, registration happens only once.
pub fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            CDC_PROBE_TOTAL,
            Unit::Count,
            "Finished latency probes, labeled by table, operation and outcome"
        );
        describe_histogram!(
            CDC_PROBE_LATENCY_SECONDS,
            Unit::Seconds,
            "Source write to target visibility latency of synced probes, labeled by table and operation"
        );
        describe_counter!(
            CDC_ROWS_INSERTED_TOTAL,
            Unit::Count,
            "Rows inserted on the source by load runs, labeled by table"
        );
        describe_counter!(
            CDC_ROWS_SYNCED_TOTAL,
            Unit::Count,
            "Load rows confirmed on the target, labeled by table"
        );
        describe_counter!(
            CDC_INSERT_ERRORS_TOTAL,
            Unit::Count,
            "Failed source inserts of load runs, labeled by table"
        );
        describe_gauge!(
            CDC_LOAD_LAG_ROWS,
            Unit::Count,
            "Rows inserted but not yet observed on the target"
        );
        describe_counter!(
            CDC_READINESS_ATTEMPTS_TOTAL,
            Unit::Count,
            "Readiness attempts, labeled by endpoint and outcome"
        );
        describe_counter!(
            CDC_CLEANUP_ROWS_REMOVED_TOTAL,
            Unit::Count,
            "Harness rows deleted on the source by cleanup, labeled by table"
        );
    });
}

mod support;

use std::time::Duration;

use cdc_harness::cleanup::{CleanupOptions, SkippedTable, cleanup};
use cdc_harness::error::ErrorKind;
use cdc_harness::types::{EntitySchema, Table};
use cdc_telemetry::tracing::init_test_tracing;
use support::{TEST_PREFIX, pipeline, probe};

fn options(wait_for_target: Option<Duration>, target_direct_delete: bool) -> CleanupOptions {
    CleanupOptions {
        prefixes: vec![TEST_PREFIX.to_string()],
        wait_for_target,
        target_direct_delete,
        check_interval: Duration::from_secs(1),
    }
}

#[tokio::test(start_paused = true)]
async fn cleanup_without_harness_rows_removes_nothing() {
    init_test_tracing();
    let pipeline = pipeline(Duration::ZERO);
    let schema = EntitySchema::standard();

    let report = cleanup(&pipeline.source(), &pipeline.target(), &schema, &options(None, false)).await;

    assert_eq!(report.total_removed_from_source(), 0);
    assert!(report.failures.is_empty());
    assert!(report.is_complete());
    assert!(report.to_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn cleanup_removes_chains_and_is_idempotent() {
    init_test_tracing();
    let pipeline = pipeline(Duration::from_secs(1));
    let schema = EntitySchema::standard();
    let mut probe = probe(&pipeline);
    for _ in 0..2 {
        probe.probe_chain().await.unwrap();
    }

    let first = cleanup(
        &pipeline.source(),
        &pipeline.target(),
        &schema,
        &options(Some(Duration::from_secs(10)), false),
    )
    .await;

    assert!(first.is_complete(), "{first}");
    assert_eq!(first.total_removed_from_source(), 10);
    assert_eq!(first.total_removed_from_target(), Some(10));
    for table in Table::INSERT_ORDER {
        assert!(pipeline.source_rows(table).await.is_empty(), "{table}");
        assert!(pipeline.target_rows(table).await.is_empty(), "{table}");
    }

    let second = cleanup(&pipeline.source(), &pipeline.target(), &schema, &options(None, false)).await;
    assert!(second.is_complete());
    assert_eq!(second.total_removed_from_source(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_child_cleanup_blocks_its_parents() {
    init_test_tracing();
    let pipeline = pipeline(Duration::ZERO);
    let schema = EntitySchema::standard();
    probe(&pipeline).probe_chain().await.unwrap();
    pipeline.fail_deletes(Table::OrderItems).await;

    let report = cleanup(&pipeline.source(), &pipeline.target(), &schema, &options(None, false)).await;

    assert!(!report.is_complete());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].table, Table::OrderItems);
    assert_eq!(report.removed_from_source[&Table::InventoryMovements], 1);
    assert!(report.skipped.contains(&SkippedTable {
        table: Table::Orders,
        blocked_by: Table::OrderItems,
    }));
    assert!(report.skipped.contains(&SkippedTable {
        table: Table::Customers,
        blocked_by: Table::Orders,
    }));
    assert_eq!(report.residual[&Table::OrderItems], 1);
    assert_eq!(report.residual[&Table::Customers], 1);
    assert_eq!(pipeline.source_rows(Table::Products).await.len(), 1);

    let err = report.to_error().unwrap();
    assert_eq!(err.kind(), ErrorKind::PartialCleanup);
}

#[tokio::test(start_paused = true)]
async fn leftovers_are_deleted_directly_on_the_target() {
    init_test_tracing();
    let pipeline = pipeline(Duration::from_secs(1));
    let schema = EntitySchema::standard();
    probe(&pipeline).probe_chain().await.unwrap();
    pipeline.set_stalled(true).await;

    let waited_only = cleanup(
        &pipeline.source(),
        &pipeline.target(),
        &schema,
        &options(Some(Duration::from_secs(5)), false),
    )
    .await;
    assert!(!waited_only.is_complete());
    assert_eq!(waited_only.residual.values().sum::<u64>(), 0);
    assert_eq!(waited_only.target_residual.as_ref().unwrap()[&Table::Orders], 1);
    assert_eq!(waited_only.total_removed_from_target(), Some(0));

    let direct = cleanup(
        &pipeline.source(),
        &pipeline.target(),
        &schema,
        &options(Some(Duration::from_secs(5)), true),
    )
    .await;
    assert!(direct.is_complete(), "{direct}");
    assert_eq!(direct.total_removed_from_target(), Some(5));
    for table in Table::INSERT_ORDER {
        assert!(pipeline.target_rows(table).await.is_empty(), "{table}");
    }
}

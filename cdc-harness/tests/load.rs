mod support;

use std::collections::HashSet;
use std::time::Duration;

use cdc_harness::concurrency::shutdown::create_shutdown_channel;
use cdc_harness::error::ErrorKind;
use cdc_harness::types::{Table, Value};
use cdc_telemetry::tracing::init_test_tracing;
use support::{controller, pipeline};

#[tokio::test(start_paused = true)]
async fn batch_against_a_stopped_pipeline_reports_zero_synced() {
    init_test_tracing();
    let pipeline = pipeline(Duration::ZERO);
    pipeline.set_stalled(true).await;
    let mut controller = controller(&pipeline, 1);

    let report = controller.run_batch(Table::Orders, 100).await.unwrap();

    assert_eq!(report.inserted, 100);
    assert_eq!(report.synced, 0);
    assert_eq!(report.sync_latency, None);
    assert!(report.waited.unwrap() >= Duration::from_secs(60));
    assert!(report.to_string().contains("synced 0/100"));
}

#[tokio::test(start_paused = true)]
async fn multi_batch_covers_every_table() {
    init_test_tracing();
    let pipeline = pipeline(Duration::from_secs(3));
    let mut controller = controller(&pipeline, 1);

    let report = controller.run_multi_batch(20).await;

    assert!(report.failures.is_empty());
    assert_eq!(report.batches.len(), 5);
    for batch in &report.batches {
        assert_eq!(batch.synced, 20, "{}", batch.table);
        assert!(batch.sync_latency.unwrap() >= Duration::from_secs(3));
    }
}

#[tokio::test(start_paused = true)]
async fn continuous_run_drains_and_keeps_references_valid() {
    init_test_tracing();
    let pipeline = pipeline(Duration::from_secs(2));
    let mut controller = controller(&pipeline, 4);
    let (_stop, shutdown) = create_shutdown_channel();

    let report = controller
        .run_continuous(
            &[Table::Orders, Table::OrderItems, Table::InventoryMovements],
            Duration::from_secs(5),
            Some(20.0),
            shutdown,
        )
        .await
        .unwrap();

    assert!(report.drained);
    assert_eq!(report.counters.lag, 0);
    assert_eq!(report.counters.inserted, report.counters.synced);
    assert!(report.at_stop.inserted >= 80);
    assert!(report.failures.is_empty());
    assert!(report.overall_latency.unwrap().min >= Duration::from_secs(2));

    let orders: HashSet<u64> = pipeline
        .source_rows(Table::Orders)
        .await
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    for (_, fields) in pipeline.source_rows(Table::OrderItems).await {
        let order_id = fields
            .iter()
            .find(|field| field.column == "order_id")
            .and_then(|field| field.value.as_int())
            .unwrap();
        assert!(orders.contains(&(order_id as u64)));
    }
}

#[tokio::test(start_paused = true)]
async fn unbounded_run_stops_on_request_and_drains() {
    init_test_tracing();
    let pipeline = pipeline(Duration::from_secs(1));
    let mut controller = controller(&pipeline, 2);
    let (stop, shutdown) = create_shutdown_channel();

    let run = tokio::spawn(async move {
        controller
            .run_unbounded(&[Table::Customers], Some(10.0), shutdown)
            .await
    });
    tokio::time::sleep(Duration::from_secs(3)).await;
    stop.shutdown();

    let report = run.await.unwrap().unwrap();
    assert!(report.at_stop.inserted > 0);
    assert!(report.drained);
    assert_eq!(report.counters.synced, report.at_stop.inserted);

    let emails: HashSet<String> = pipeline
        .target_rows(Table::Customers)
        .await
        .into_iter()
        .filter_map(|(_, fields)| {
            fields
                .into_iter()
                .find(|field| field.column == "email")
                .and_then(|field| match field.value {
                    Value::Text(email) => Some(email),
                    _ => None,
                })
        })
        .collect();
    assert_eq!(emails.len() as u64, report.counters.inserted);
}

#[tokio::test(start_paused = true)]
async fn insert_errors_are_counted_without_stopping_the_run() {
    init_test_tracing();
    let pipeline = pipeline(Duration::ZERO);
    pipeline.set_source_down(true).await;
    let mut controller = controller(&pipeline, 2);
    let (_stop, shutdown) = create_shutdown_channel();

    let report = controller
        .run_continuous(&[Table::Products], Duration::from_secs(2), Some(4.0), shutdown)
        .await
        .unwrap();

    assert_eq!(report.counters.inserted, 0);
    assert!(report.counters.errors > 0);
    assert!(report.drained);
}

#[tokio::test(start_paused = true)]
async fn bursts_insert_correlated_chains() {
    init_test_tracing();
    let pipeline = pipeline(Duration::from_millis(500));
    let mut controller = controller(&pipeline, 1);
    let (_stop, shutdown) = create_shutdown_channel();

    let report = controller
        .run_burst(2, 3, Duration::from_secs(5), shutdown)
        .await
        .unwrap();

    assert!(report.drained);
    for table in Table::INSERT_ORDER {
        assert_eq!(pipeline.source_rows(table).await.len(), 6, "{table}");
    }
    assert_eq!(report.counters.inserted, 30);
}

#[tokio::test(start_paused = true)]
async fn oversized_batches_fail_before_touching_the_source() {
    init_test_tracing();
    let pipeline = pipeline(Duration::ZERO);
    let mut controller = controller(&pipeline, 1);

    // Eight columns per customer row, one parameter over the statement limit.
    let err = controller
        .run_batch(Table::Customers, 8192)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidData);
    assert!(pipeline.source_rows(Table::Customers).await.is_empty());
}

mod support;

use std::collections::HashSet;
use std::time::Duration;

use cdc_harness::probe::{Operation, ProbeOutcome};
use cdc_harness::types::Table;
use cdc_telemetry::tracing::init_test_tracing;
use support::{pipeline, probe};

#[tokio::test(start_paused = true)]
async fn order_insert_with_ten_second_delay_is_measured_within_one_interval() {
    init_test_tracing();
    let pipeline = pipeline(Duration::from_secs(10));
    let mut probe = probe(&pipeline);

    let record = probe.probe_insert(Table::Orders).await.unwrap();

    let latency_ms = record.latency().unwrap().as_millis();
    assert!((10_000..=11_000).contains(&latency_ms));
    assert!(record.observed_at().unwrap() >= record.written_at);
}

#[tokio::test(start_paused = true)]
async fn row_that_never_arrives_times_out() {
    init_test_tracing();
    let pipeline = pipeline(Duration::ZERO);
    pipeline.set_stalled(true).await;
    let mut probe = probe(&pipeline);

    let record = probe.probe_insert(Table::InventoryMovements).await.unwrap();

    assert!(matches!(
        record.outcome(),
        Some(ProbeOutcome::Timeout { waited }) if waited >= Duration::from_secs(60)
    ));
    assert_eq!(record.latency(), None);
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["status"], "timeout");
    assert!(json["latency_ms"].is_null());
}

#[tokio::test(start_paused = true)]
async fn delete_is_not_issued_before_the_row_was_seen_on_the_target() {
    init_test_tracing();
    let pipeline = pipeline(Duration::from_secs(1));
    let mut probe = probe(&pipeline);

    // The row shows up after 1s, the delete is issued after the 2s settle wait.
    let record = probe.probe_delete(Table::Orders).await.unwrap();
    assert_eq!(record.operation, Operation::Delete);
    assert_eq!(record.latency(), Some(Duration::from_secs(1)));
    assert!(pipeline.source_rows(Table::Orders).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn markers_stay_unique_across_probes() {
    init_test_tracing();
    let pipeline = pipeline(Duration::ZERO);
    let mut probe = probe(&pipeline);

    let mut markers = HashSet::new();
    for _ in 0..3 {
        for record in probe.probe_chain().await.unwrap() {
            assert!(markers.insert(record.marker.clone()), "duplicate {}", record.marker);
        }
    }
    assert_eq!(markers.len(), 15);
}

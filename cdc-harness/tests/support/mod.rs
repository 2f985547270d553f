use std::sync::Arc;
use std::time::Duration;

use cdc_config::shared::{LoadConfig, ProbeConfig};
use cdc_harness::clients::memory::{MemoryPipeline, MemorySource, MemoryTarget};
use cdc_harness::generator::{EntityGenerator, MarkerFactory, ParentKeyCache};
use cdc_harness::load::LoadController;
use cdc_harness::probe::LatencyProbe;
use cdc_harness::types::EntitySchema;
use cdc_harness::writer::RowWriter;

pub const TEST_PREFIX: &str = "cdcb_";

pub fn pipeline(delay: Duration) -> MemoryPipeline {
    MemoryPipeline::new(Arc::new(EntitySchema::standard()), delay)
}

pub fn writer(pipeline: &MemoryPipeline) -> RowWriter<MemorySource> {
    let generator = EntityGenerator::new(
        Arc::new(EntitySchema::standard()),
        Arc::new(MarkerFactory::new(TEST_PREFIX)),
        Arc::new(ParentKeyCache::new(1000)),
    );
    RowWriter::new(pipeline.source(), generator)
}

pub fn probe_config(max_wait_secs: u64) -> ProbeConfig {
    ProbeConfig {
        check_interval_ms: 1000,
        max_wait_secs,
        delete_settle_ms: 2000,
    }
}

pub fn probe(pipeline: &MemoryPipeline) -> LatencyProbe<MemorySource, MemoryTarget> {
    LatencyProbe::new(writer(pipeline), pipeline.target(), probe_config(60))
}

pub fn load_config(workers: usize) -> LoadConfig {
    LoadConfig {
        workers,
        drain_grace_secs: 30,
        sync_check_interval_ms: 500,
        progress_interval_ms: 1000,
        ..LoadConfig::default()
    }
}

pub fn controller(
    pipeline: &MemoryPipeline,
    workers: usize,
) -> LoadController<MemorySource, MemoryTarget> {
    LoadController::new(
        writer(pipeline),
        pipeline.target(),
        probe_config(60),
        load_config(workers),
    )
}

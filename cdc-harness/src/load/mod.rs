//! Load generation: one-shot batches, paced continuous and unbounded runs, bursts.

mod controller;
mod counters;
mod pool;
mod tracker;

pub use controller::LoadController;
pub use counters::{CountersSnapshot, LoadCounters, TableSnapshot};
pub use pool::WorkerPool;
pub use tracker::{LagSample, SyncSummary, SyncTracker, WrittenRow};

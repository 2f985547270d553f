//! Coordination primitives shared by the load workers, the sync tracker and the reporters.
//!
//! [`shutdown`] broadcasts the stop signal of a run to every task, [`pacer`] spaces out
//! inserts so a worker approximates its share of the target rate.

pub mod pacer;
pub mod shutdown;

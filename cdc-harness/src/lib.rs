pub mod bootstrap;
pub mod cleanup;
pub mod clients;
pub mod concurrency;
pub mod error;
pub mod generator;
pub mod load;
mod macros;
pub mod metrics;
pub mod monitor;
pub mod probe;
pub mod readiness;
pub mod report;
pub mod types;
pub mod verify;
pub mod writer;

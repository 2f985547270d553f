//! Typed clients for the two collaborators of the pipeline under test.
//!
//! [`SourceClient`] writes to the OLTP source, [`TargetClient`] reads the analytical target.
//! Both have a network implementation speaking the MySQL protocol and share an in-memory
//! implementation simulating the replication pipeline.

mod base;
pub mod memory;
pub mod mysql;
mod sql;
pub mod starrocks;

pub use base::*;

//! Connection utilities for endpoints speaking the MySQL wire protocol.
//!
//! Both the MySQL source and the StarRocks target are reached through these helpers.

pub mod db;
#[cfg(feature = "test-utils")]
pub mod sqlx;
pub mod version;

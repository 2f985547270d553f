use std::num::NonZeroI32;
use std::time::Duration;

use cdc_config::shared::{IntoConnectOptions, MySqlConnectionConfig};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySqlExecutor, MySqlPool, Row};
use tracing::debug;

/// Creates a lazily connecting pool for the configured database.
///
/// No connection is opened until the first query, so an unreachable endpoint surfaces as a
/// query error that callers can retry instead of failing pool construction.
pub fn connect_lazy(
    config: &MySqlConnectionConfig,
    max_connections: u32,
    acquire_timeout: Duration,
) -> MySqlPool {
    debug!(
        host = %config.host,
        port = config.port,
        database = %config.name,
        max_connections,
        "creating connection pool"
    );

    MySqlPoolOptions::new()
        .min_connections(0)
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect_lazy_with(config.with_db())
}

/// Runs the trivial liveness query.
///
/// Uses the text protocol, which every MySQL-compatible front end understands.
pub async fn ping<'c, E>(executor: E) -> Result<(), sqlx::Error>
where
    E: MySqlExecutor<'c>,
{
    sqlx::raw_sql("SELECT 1").execute(executor).await?;

    Ok(())
}

/// Returns the numeric server version reported by `VERSION()`.
pub async fn server_version<'c, E>(executor: E) -> Result<Option<NonZeroI32>, sqlx::Error>
where
    E: MySqlExecutor<'c>,
{
    let row = sqlx::raw_sql("SELECT VERSION()").fetch_one(executor).await?;
    let version: String = row.try_get(0)?;

    Ok(extract_server_version(version))
}

/// Extracts the server version from a version string.
///
/// Parses strings like "8.0.35", "5.7.44-log" or "5.1.0" (what StarRocks front ends report)
/// into `MAJOR * 10000 + MINOR * 100 + PATCH`, e.g. 8.0.35 becomes 80035.
///
/// Returns `None` if the string cannot be parsed or results in zero.
pub fn extract_server_version(server_version_str: impl AsRef<str>) -> Option<NonZeroI32> {
    let version_part = server_version_str
        .as_ref()
        .split_whitespace()
        .next()
        .unwrap_or("0.0.0");

    let version_part = version_part.split('-').next().unwrap_or("0.0.0");

    let mut components = version_part
        .split('.')
        .map(|component| component.parse::<i32>().unwrap_or(0));

    let major = components.next().unwrap_or(0);
    let minor = components.next().unwrap_or(0);
    let patch = components.next().unwrap_or(0);

    NonZeroI32::new(major * 10000 + minor * 100 + patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_versions() {
        assert_eq!(extract_server_version("8.0.35"), NonZeroI32::new(80035));
        assert_eq!(extract_server_version("5.7.44"), NonZeroI32::new(50744));
        assert_eq!(extract_server_version("5.1.0"), NonZeroI32::new(50100));
    }

    #[test]
    fn ignores_distribution_suffixes() {
        assert_eq!(extract_server_version("8.0.35-log"), NonZeroI32::new(80035));
        assert_eq!(
            extract_server_version("5.7.44-0ubuntu0.18.04.1"),
            NonZeroI32::new(50744)
        );
        assert_eq!(extract_server_version("  8.4.0\n"), NonZeroI32::new(80400));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(extract_server_version(""), None);
        assert_eq!(extract_server_version("invalid"), None);
        assert_eq!(extract_server_version("0.0.0"), None);
    }
}

mod support;

use std::sync::Arc;
use std::time::Duration;

use cdc_config::shared::{MySqlConnectionConfig, TlsConfig};
use cdc_harness::bootstrap::{SchemaScript, apply_schema};
use cdc_harness::cleanup::{CleanupOptions, cleanup};
use cdc_harness::clients::SourceClient;
use cdc_harness::clients::mysql::MySqlSource;
use cdc_harness::generator::{EntityGenerator, MarkerFactory, ParentKeyCache};
use cdc_harness::types::{EntitySchema, RowFilter, Table};
use cdc_harness::writer::RowWriter;
use cdc_mysql::sqlx::test_utils::{create_mysql_database, drop_mysql_database};
use cdc_mysql::version::{MYSQL_8_0, meets_version};
use cdc_telemetry::tracing::init_test_tracing;
use support::{TEST_PREFIX, pipeline};
use uuid::Uuid;

/// Connection settings of the MySQL server used by live tests.
///
/// Read from `TESTS_MYSQL_HOST`, `TESTS_MYSQL_PORT`, `TESTS_MYSQL_USERNAME` and the optional
/// `TESTS_MYSQL_PASSWORD`. Every call picks a fresh database name.
fn local_mysql_config() -> MySqlConnectionConfig {
    MySqlConnectionConfig {
        host: std::env::var("TESTS_MYSQL_HOST").expect("TESTS_MYSQL_HOST must be set"),
        port: std::env::var("TESTS_MYSQL_PORT")
            .expect("TESTS_MYSQL_PORT must be set")
            .parse()
            .expect("TESTS_MYSQL_PORT must be a valid port number"),
        name: format!("cdc_bench_{}", Uuid::new_v4().simple()),
        username: std::env::var("TESTS_MYSQL_USERNAME").expect("TESTS_MYSQL_USERNAME must be set"),
        password: std::env::var("TESTS_MYSQL_PASSWORD").ok().map(Into::into),
        tls: TlsConfig::disabled(),
        minimal_session: false,
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a MySQL server"]
async fn rows_written_to_mysql_are_counted_and_cleaned_up() {
    init_test_tracing();
    let config = local_mysql_config();
    let pool = create_mysql_database(&config).await;
    let schema = Arc::new(EntitySchema::standard());
    let source = MySqlSource::new(pool, schema.clone());

    let version = source.server_version().await.unwrap();
    assert!(meets_version(version, MYSQL_8_0));

    let applied = apply_schema(&source, &SchemaScript::builtin_source()).await.unwrap();
    assert!(applied.statements >= 5);
    // Applying twice is a no-op.
    apply_schema(&source, &SchemaScript::builtin_source()).await.unwrap();

    let generator = EntityGenerator::new(
        schema.clone(),
        Arc::new(MarkerFactory::new(TEST_PREFIX)),
        Arc::new(ParentKeyCache::new(100)),
    );
    let mut writer = RowWriter::new(source.clone(), generator);
    let item = writer.insert(Table::OrderItems).await.unwrap();
    assert_eq!(item.created_parents.len(), 3);
    let batch = writer.insert_batch(Table::Customers, 50).await.unwrap();
    assert_eq!(batch.keys.count, 50);

    let customers = source
        .count(Table::Customers, &RowFilter::MarkerPrefix(TEST_PREFIX.to_string()))
        .await
        .unwrap();
    assert_eq!(customers, 51);

    let options = CleanupOptions {
        prefixes: vec![TEST_PREFIX.to_string()],
        wait_for_target: None,
        target_direct_delete: false,
        check_interval: Duration::from_secs(1),
    };
    let unused_target = pipeline(Duration::ZERO).target();
    let report = cleanup(&source, &unused_target, &schema, &options).await;
    assert!(report.is_complete(), "{report}");
    assert_eq!(report.total_removed_from_source(), 54);

    drop_mysql_database(&config).await;
}

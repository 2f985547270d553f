use cdc_config::shared::{IntoConnectOptions, MySqlConnectionConfig};
use sqlx::{ConnectOptions, Executor, MySqlPool};

/// Creates the configured database and returns a pool connected to it.
///
/// # Panics
/// Panics if connection or database creation fails.
pub async fn create_mysql_database(config: &MySqlConnectionConfig) -> MySqlPool {
    let mut connection = config
        .without_db()
        .connect()
        .await
        .expect("Failed to connect to MySQL");

    connection
        .execute(&*format!("CREATE DATABASE `{}`", config.name))
        .await
        .expect("Failed to create database");

    MySqlPool::connect_with(config.with_db())
        .await
        .expect("Failed to connect to MySQL database")
}

/// Drops the configured database if it exists.
///
/// # Panics
/// Panics if any database operation fails.
pub async fn drop_mysql_database(config: &MySqlConnectionConfig) {
    let mut connection = config
        .without_db()
        .connect()
        .await
        .expect("Failed to connect to MySQL");

    connection
        .execute(&*format!("DROP DATABASE IF EXISTS `{}`", config.name))
        .await
        .expect("Failed to destroy database");
}

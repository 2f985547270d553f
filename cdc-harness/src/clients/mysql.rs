use std::num::NonZeroI32;
use std::sync::Arc;
use std::time::Duration;

use cdc_config::shared::MySqlConnectionConfig;
use cdc_mysql::db;
use sqlx::{MySqlPool, Row};
use tracing::debug;

use crate::clients::sql::{
    bind_value, count_statement, delete_statement, insert_statement, update_statement,
};
use crate::clients::{InsertedKeys, SchemaExecutor, SourceClient};
use crate::error::HarnessResult;
use crate::types::{Binding, EntitySchema, GeneratedRow, RowFilter, Table, Value};

/// [`SourceClient`] for a MySQL source.
///
/// Statements are prepared with bound parameters. The pool connects lazily, so an unreachable
/// server surfaces as a [`crate::error::ErrorKind::SourceConnectionFailed`] on first use.
#[derive(Debug, Clone)]
pub struct MySqlSource {
    pool: MySqlPool,
    schema: Arc<EntitySchema>,
}

impl MySqlSource {
    pub fn new(pool: MySqlPool, schema: Arc<EntitySchema>) -> Self {
        Self { pool, schema }
    }

    /// Creates a source client with a lazily connecting pool.
    pub fn connect(
        config: &MySqlConnectionConfig,
        schema: Arc<EntitySchema>,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Self {
        let pool = db::connect_lazy(config, max_connections, acquire_timeout);
        Self::new(pool, schema)
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

impl SourceClient for MySqlSource {
    async fn ping(&self) -> HarnessResult<()> {
        db::ping(&self.pool).await?;

        Ok(())
    }

    async fn server_version(&self) -> HarnessResult<Option<NonZeroI32>> {
        Ok(db::server_version(&self.pool).await?)
    }

    async fn insert(&self, row: &GeneratedRow) -> HarnessResult<u64> {
        let (_, sql) = insert_statement(std::slice::from_ref(row))?;
        let mut query = sqlx::query(&sql);
        for field in &row.fields {
            query = bind_value(query, &field.value);
        }

        let result = query.execute(&self.pool).await?;

        Ok(result.last_insert_id())
    }

    async fn insert_batch(&self, rows: &[GeneratedRow]) -> HarnessResult<InsertedKeys> {
        let (table, sql) = insert_statement(rows)?;
        let mut query = sqlx::query(&sql);
        for field in rows.iter().flat_map(|row| &row.fields) {
            query = bind_value(query, &field.value);
        }

        let result = query.execute(&self.pool).await?;
        debug!(%table, rows = result.rows_affected(), "inserted batch on source");

        Ok(InsertedKeys {
            first: result.last_insert_id(),
            count: result.rows_affected(),
        })
    }

    async fn update(
        &self,
        table: Table,
        key: u64,
        column: &'static str,
        value: Value,
    ) -> HarnessResult<u64> {
        let sql = update_statement(&self.schema, table, column);
        let query = bind_value(sqlx::query(&sql), &value);
        let result = query.bind(key).execute(&self.pool).await?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, table: Table, filter: &RowFilter) -> HarnessResult<u64> {
        let predicate = filter.to_predicate(&self.schema, table, Binding::Parameters)?;
        let sql = delete_statement(table, &predicate);
        let mut query = sqlx::query(&sql);
        for param in &predicate.params {
            query = bind_value(query, param);
        }

        let result = query.execute(&self.pool).await?;

        Ok(result.rows_affected())
    }

    async fn count(&self, table: Table, filter: &RowFilter) -> HarnessResult<u64> {
        let predicate = filter.to_predicate(&self.schema, table, Binding::Parameters)?;
        let sql = count_statement(table, &predicate);
        let mut query = sqlx::query(&sql);
        for param in &predicate.params {
            query = bind_value(query, param);
        }

        let row = query.fetch_one(&self.pool).await?;
        let count: i64 = row.try_get(0)?;

        Ok(count.max(0) as u64)
    }
}

impl SchemaExecutor for MySqlSource {
    async fn execute_statement(&self, statement: &str) -> HarnessResult<()> {
        sqlx::raw_sql(statement).execute(&self.pool).await?;

        Ok(())
    }
}

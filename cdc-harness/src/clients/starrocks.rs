use std::sync::Arc;
use std::time::Duration;

use cdc_config::shared::MySqlConnectionConfig;
use cdc_mysql::db;
use sqlx::{MySqlPool, Row};

use crate::clients::sql::{count_statement, delete_statement, keys_statement};
use crate::clients::{SchemaExecutor, TargetClient};
use crate::error::{HarnessError, HarnessResult};
use crate::types::{Binding, EntitySchema, RowFilter, Table};

/// Maximum keys looked up by one statement.
const KEYS_PER_LOOKUP: usize = 500;

/// [`TargetClient`] for a StarRocks front end.
///
/// StarRocks speaks the MySQL protocol but its prepared statement support varies across
/// versions, so every statement goes over the text protocol with escaped inline literals.
#[derive(Debug, Clone)]
pub struct StarRocksTarget {
    pool: MySqlPool,
    schema: Arc<EntitySchema>,
}

impl StarRocksTarget {
    pub fn new(pool: MySqlPool, schema: Arc<EntitySchema>) -> Self {
        Self { pool, schema }
    }

    pub fn connect(
        config: &MySqlConnectionConfig,
        schema: Arc<EntitySchema>,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Self {
        let pool = db::connect_lazy(config, max_connections, acquire_timeout);
        Self::new(pool, schema)
    }
}

impl TargetClient for StarRocksTarget {
    async fn ping(&self) -> HarnessResult<()> {
        db::ping(&self.pool).await.map_err(HarnessError::from_target)
    }

    async fn count(&self, table: Table, filter: &RowFilter) -> HarnessResult<u64> {
        let predicate = filter.to_predicate(&self.schema, table, Binding::Inline)?;
        let sql = count_statement(table, &predicate);

        let row = sqlx::raw_sql(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(HarnessError::from_target)?;
        let count: i64 = row.try_get(0).map_err(HarnessError::from_target)?;

        Ok(count.max(0) as u64)
    }

    async fn observed_keys(&self, table: Table, keys: &[u64]) -> HarnessResult<Vec<u64>> {
        let mut observed = Vec::new();
        for chunk in keys.chunks(KEYS_PER_LOOKUP) {
            let sql = keys_statement(&self.schema, table, chunk);
            let rows = sqlx::raw_sql(&sql)
                .fetch_all(&self.pool)
                .await
                .map_err(HarnessError::from_target)?;

            for row in rows {
                let key: i64 = row.try_get(0).map_err(HarnessError::from_target)?;
                observed.push(key as u64);
            }
        }

        Ok(observed)
    }

    async fn alive_backends(&self) -> HarnessResult<usize> {
        let rows = sqlx::raw_sql("SHOW BACKENDS")
            .fetch_all(&self.pool)
            .await
            .map_err(HarnessError::from_target)?;

        let mut alive = 0;
        for row in rows {
            let state: String = row.try_get("Alive").map_err(HarnessError::from_target)?;
            if state.eq_ignore_ascii_case("true") {
                alive += 1;
            }
        }

        Ok(alive)
    }

    fn supports_delete(&self) -> bool {
        true
    }

    async fn delete(&self, table: Table, filter: &RowFilter) -> HarnessResult<u64> {
        let predicate = filter.to_predicate(&self.schema, table, Binding::Inline)?;
        let sql = delete_statement(table, &predicate);

        let result = sqlx::raw_sql(&sql)
            .execute(&self.pool)
            .await
            .map_err(HarnessError::from_target)?;

        Ok(result.rows_affected())
    }
}

impl SchemaExecutor for StarRocksTarget {
    async fn execute_statement(&self, statement: &str) -> HarnessResult<()> {
        sqlx::raw_sql(statement)
            .execute(&self.pool)
            .await
            .map_err(HarnessError::from_target)?;

        Ok(())
    }
}

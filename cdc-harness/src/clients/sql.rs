use sqlx::MySql;
use sqlx::mysql::MySqlArguments;
use sqlx::query::Query;

use crate::bail;
use crate::clients::base::check_batch_parameters;
use crate::error::{ErrorKind, HarnessResult};
use crate::types::{EntitySchema, GeneratedRow, Predicate, Table, Value, quote_identifier};

/// Builds a parameterized multi-row `INSERT` for rows of a single table.
pub(super) fn insert_statement(rows: &[GeneratedRow]) -> HarnessResult<(Table, String)> {
    let Some(first) = rows.first() else {
        bail!(ErrorKind::InvalidData, "Cannot insert an empty batch");
    };

    check_batch_parameters(rows)?;

    let columns: Vec<&'static str> = first.columns().collect();
    for row in rows {
        if row.table != first.table || !row.columns().eq(columns.iter().copied()) {
            bail!(
                ErrorKind::InvalidData,
                "Batch rows must share table and columns",
                format!("{} differs from {}", row.marker, first.marker)
            );
        }
    }

    let column_list = columns
        .iter()
        .map(|column| quote_identifier(column))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![placeholders; rows.len()].join(", ");

    Ok((
        first.table,
        format!(
            "INSERT INTO {} ({column_list}) VALUES {values}",
            quote_identifier(first.table.name())
        ),
    ))
}

pub(super) fn update_statement(schema: &EntitySchema, table: Table, column: &str) -> String {
    format!(
        "UPDATE {} SET {} = ? WHERE {} = ?",
        quote_identifier(table.name()),
        quote_identifier(column),
        quote_identifier(schema.spec(table).key_column)
    )
}

pub(super) fn count_statement(table: Table, predicate: &Predicate) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        quote_identifier(table.name()),
        predicate.sql
    )
}

pub(super) fn delete_statement(table: Table, predicate: &Predicate) -> String {
    format!(
        "DELETE FROM {} WHERE {}",
        quote_identifier(table.name()),
        predicate.sql
    )
}

/// Builds a lookup of which `keys` exist, with the keys inlined.
pub(super) fn keys_statement(schema: &EntitySchema, table: Table, keys: &[u64]) -> String {
    let key_column = quote_identifier(schema.spec(table).key_column);
    let key_list = keys
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT {key_column} FROM {} WHERE {key_column} IN ({key_list})",
        quote_identifier(table.name())
    )
}

/// Binds a typed value to the next placeholder.
pub(super) fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<i64>),
        Value::Int(value) => query.bind(*value),
        Value::Decimal(value) => query.bind(*value),
        Value::Text(value) => query.bind(value.clone()),
        Value::Bool(value) => query.bind(*value),
        Value::Date(value) => query.bind(*value),
    }
}

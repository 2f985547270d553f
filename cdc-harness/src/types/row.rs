use chrono::NaiveDate;

use crate::types::Table;

/// A typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    /// Two-digit money and price amounts.
    Decimal(f64),
    Text(String),
    Bool(bool),
    Date(NaiveDate),
}

impl Value {
    /// Renders the value as a SQL literal for statements sent over the text protocol.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Int(value) => value.to_string(),
            Value::Decimal(value) => format!("{value:.2}"),
            Value::Text(value) => quote_literal(value),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Date(value) => format!("'{}'", value.format("%Y-%m-%d")),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Int(value as i64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

/// Quotes a string literal, escaping backslashes and single quotes the way MySQL expects.
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\0' => quoted.push_str("\\0"),
            ch => quoted.push(ch),
        }
    }
    quoted.push('\'');
    quoted
}

/// Quotes an identifier with backticks.
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// A named column value of a generated row.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub column: &'static str,
    pub value: Value,
}

impl Field {
    pub fn new(column: &'static str, value: impl Into<Value>) -> Self {
        Self {
            column,
            value: value.into(),
        }
    }
}

/// A synthetic row ready to be inserted on the source.
///
/// The marker is the correlation handle between the source write and the target observation.
/// `parents` lists the confirmed parent keys the row references, one per foreign key.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedRow {
    pub table: Table,
    pub marker: String,
    pub fields: Vec<Field>,
    pub parents: Vec<(Table, u64)>,
}

impl GeneratedRow {
    /// Returns the value of `column`, if the row sets it.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|field| field.column == column)
            .map(|field| &field.value)
    }

    /// Returns the key of the referenced parent row in `table`.
    pub fn parent_key(&self, table: Table) -> Option<u64> {
        self.parents
            .iter()
            .find(|(parent, _)| *parent == table)
            .map(|(_, key)| *key)
    }

    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|field| field.column)
    }
}

/// Rows generated for a single multi-row insert.
///
/// Every marker of the batch starts with `marker_prefix`.
#[derive(Debug, Clone)]
pub struct GeneratedBatch {
    pub table: Table,
    pub marker_prefix: String,
    pub rows: Vec<GeneratedRow>,
}

impl GeneratedBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

use crate::bail;
use crate::error::{ErrorKind, HarnessResult};
use crate::types::{EntitySchema, Table, Value, quote_identifier};

/// Selects rows of one table on either side of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum RowFilter {
    /// Every row of the table.
    All,
    /// The row whose marker column holds exactly this marker.
    Marker(String),
    /// Rows whose marker column starts with this prefix.
    MarkerPrefix(String),
    Key(u64),
    /// Keys in `first..=last`.
    KeyRange { first: u64, last: u64 },
    /// The row with `key` once `column` holds `value`.
    KeyWithValue {
        key: u64,
        column: &'static str,
        value: Value,
    },
    /// Rows referencing a row of `parent` whose marker starts with `prefix`.
    ParentMarkerPrefix { parent: Table, prefix: String },
}

impl RowFilter {
    /// Returns the prefix filter identifying harness rows of `table`.
    ///
    /// Tables without their own marker column are matched through the parent that has one.
    pub fn marker_prefix_for(
        schema: &EntitySchema,
        table: Table,
        prefix: impl Into<String>,
    ) -> HarnessResult<RowFilter> {
        let prefix = prefix.into();
        match schema.marker_owner(table) {
            Some((owner, None)) if owner == table => Ok(RowFilter::MarkerPrefix(prefix)),
            Some((parent, _)) => Ok(RowFilter::ParentMarkerPrefix { parent, prefix }),
            None => bail!(
                ErrorKind::InvalidData,
                "Table cannot be matched by marker",
                format!("{table} has no marker column and no marked parent")
            ),
        }
    }

    /// Renders the filter as a `WHERE` condition for `table`.
    pub fn to_predicate(
        &self,
        schema: &EntitySchema,
        table: Table,
        binding: Binding,
    ) -> HarnessResult<Predicate> {
        let spec = schema.spec(table);
        let key = quote_identifier(spec.key_column);
        let mut predicate = Predicate::new(binding);

        match self {
            RowFilter::All => predicate.push_sql("1 = 1"),
            RowFilter::Marker(marker) => {
                let Some(column) = spec.marker_column else {
                    bail!(
                        ErrorKind::InvalidData,
                        "Table has no marker column",
                        table.to_string()
                    );
                };
                predicate.push_sql(&format!("{} = ", quote_identifier(column)));
                predicate.push_value(Value::Text(format!("{marker}{}", spec.marker_suffix)));
            }
            RowFilter::MarkerPrefix(prefix) => {
                let Some(column) = spec.marker_column else {
                    bail!(
                        ErrorKind::InvalidData,
                        "Table has no marker column",
                        table.to_string()
                    );
                };
                predicate.push_sql(&format!("{} LIKE ", quote_identifier(column)));
                predicate.push_value(Value::Text(like_prefix(prefix)));
            }
            RowFilter::Key(value) => {
                predicate.push_sql(&format!("{key} = "));
                predicate.push_value(Value::from(*value));
            }
            RowFilter::KeyRange { first, last } => {
                predicate.push_sql(&format!("{key} BETWEEN "));
                predicate.push_value(Value::from(*first));
                predicate.push_sql(" AND ");
                predicate.push_value(Value::from(*last));
            }
            RowFilter::KeyWithValue {
                key: value,
                column,
                value: expected,
            } => {
                predicate.push_sql(&format!("{key} = "));
                predicate.push_value(Value::from(*value));
                predicate.push_sql(&format!(" AND {} = ", quote_identifier(column)));
                predicate.push_value(expected.clone());
            }
            RowFilter::ParentMarkerPrefix { parent, prefix } => {
                let parent_spec = schema.spec(*parent);
                let (Some(foreign_key), Some(marker_column)) =
                    (spec.reference_to(*parent), parent_spec.marker_column)
                else {
                    bail!(
                        ErrorKind::InvalidData,
                        "Table cannot be matched through this parent",
                        format!("{table} -> {parent}")
                    );
                };

                predicate.push_sql(&format!(
                    "{} IN (SELECT {} FROM {} WHERE {} LIKE ",
                    quote_identifier(foreign_key.column),
                    quote_identifier(parent_spec.key_column),
                    quote_identifier(parent.name()),
                    quote_identifier(marker_column),
                ));
                predicate.push_value(Value::Text(like_prefix(prefix)));
                predicate.push_sql(")");
            }
        }

        Ok(predicate)
    }
}

/// How values are carried by a rendered [`Predicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// `?` placeholders with values in [`Predicate::params`].
    Parameters,
    /// Escaped literals inlined into the SQL, for the text protocol.
    Inline,
}

/// A rendered `WHERE` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    binding: Binding,
    pub sql: String,
    pub params: Vec<Value>,
}

impl Predicate {
    fn new(binding: Binding) -> Self {
        Self {
            binding,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_sql(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    fn push_value(&mut self, value: Value) {
        match self.binding {
            Binding::Parameters => {
                self.sql.push('?');
                self.params.push(value);
            }
            Binding::Inline => self.sql.push_str(&value.to_sql_literal()),
        }
    }
}

/// Builds a `LIKE` pattern matching values starting with `prefix`.
pub fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

//! Idempotent application of schema scripts.
//!
//! Idempotence comes from the scripts themselves, which only use `IF NOT EXISTS` statements.
//! The bootstrapper executes them one statement at a time and stops at the first failure,
//! surfacing the driver error verbatim.

use std::path::Path;

use tracing::{debug, info};

use crate::clients::SchemaExecutor;
use crate::error::{ErrorKind, HarnessResult};
use crate::harness_error;

/// A named schema script.
#[derive(Debug, Clone)]
pub struct SchemaScript {
    pub name: String,
    pub sql: String,
}

impl SchemaScript {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }

    /// Reads a script from a file, named after the file.
    pub async fn from_path(path: &Path) -> HarnessResult<Self> {
        let sql = tokio::fs::read_to_string(path).await.map_err(|err| {
            harness_error!(
                ErrorKind::IoError,
                "Failed to read schema script",
                format!("{}: {err}", path.display()),
                source: err
            )
        })?;

        Ok(Self::new(path.display().to_string(), sql))
    }

    /// Returns the bundled MySQL schema of the commerce tables.
    pub fn builtin_source() -> Self {
        Self::new("builtin source schema", include_str!("../schema/source.sql"))
    }

    /// Returns the bundled StarRocks schema of the commerce tables.
    pub fn builtin_target() -> Self {
        Self::new("builtin target schema", include_str!("../schema/target.sql"))
    }
}

/// Result of a successful [`apply_schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedSchema {
    pub name: String,
    pub statements: usize,
}

/// Executes every statement of `script` in order.
///
/// The first failing statement aborts with [`ErrorKind::SchemaApplyFailed`]; the error detail
/// holds the statement and the underlying error, which is also kept as source.
pub async fn apply_schema<E>(executor: &E, script: &SchemaScript) -> HarnessResult<AppliedSchema>
where
    E: SchemaExecutor,
{
    let statements = split_statements(&script.sql);
    info!(script = %script.name, statements = statements.len(), "applying schema");

    for (index, statement) in statements.iter().enumerate() {
        debug!(script = %script.name, index, "executing schema statement");

        if let Err(err) = executor.execute_statement(statement).await {
            let detail = format!(
                "{} statement {} failed: {}\ncause: {}",
                script.name,
                index + 1,
                statement,
                err.detail().unwrap_or(err.description())
            );
            return Err(harness_error!(
                ErrorKind::SchemaApplyFailed,
                "Schema statement failed",
                detail = detail,
                source: err
            ));
        }
    }

    Ok(AppliedSchema {
        name: script.name.clone(),
        statements: statements.len(),
    })
}

/// Splits a script into statements on `;`, ignoring separators inside quotes and comments.
///
/// Comments are dropped and empty statements are skipped.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = script.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(open) = quote {
            current.push(ch);
            if ch == '\\' && open != '`' {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            } else if ch == open {
                quote = None;
            }
            continue;
        }

        match ch {
            '\'' | '"' | '`' => {
                quote = Some(ch);
                current.push(ch);
            }
            '-' if chars.peek() == Some(&'-') => skip_line(&mut chars),
            '#' => skip_line(&mut chars),
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for next in chars.by_ref() {
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
                current.push(' ');
            }
            ';' => push_statement(&mut statements, &mut current),
            ch => current.push(ch),
        }
    }
    push_statement(&mut statements, &mut current);

    statements
}

fn skip_line(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    for next in chars.by_ref() {
        if next == '\n' {
            break;
        }
    }
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::clients::memory::MemoryPipeline;
    use crate::types::EntitySchema;

    #[test]
    fn splits_on_top_level_semicolons() {
        let script = r#"
            -- customers first; then the rest
            CREATE TABLE IF NOT EXISTS a (note VARCHAR(10) DEFAULT 'x;y');
            # mysql style comment;
            /* block; comment */ CREATE TABLE IF NOT EXISTS b (id INT);
            INSERT INTO b VALUES ('it\'s; fine');
        "#;

        let statements = split_statements(script);
        assert_eq!(statements.len(), 3);
        assert_eq!(
            statements[0],
            "CREATE TABLE IF NOT EXISTS a (note VARCHAR(10) DEFAULT 'x;y')"
        );
        assert_eq!(statements[1], "CREATE TABLE IF NOT EXISTS b (id INT)");
        assert_eq!(statements[2], r"INSERT INTO b VALUES ('it\'s; fine')");
    }

    #[test]
    fn empty_script_has_no_statements() {
        assert!(split_statements("  ;; -- nothing\n").is_empty());
    }

    #[test]
    fn builtin_scripts_declare_every_table() {
        for script in [SchemaScript::builtin_source(), SchemaScript::builtin_target()] {
            let statements = split_statements(&script.sql);
            for table in crate::types::Table::INSERT_ORDER {
                let name = format!("IF NOT EXISTS {}", table.name());
                assert!(
                    statements.iter().any(|statement| statement.contains(&name)),
                    "{} misses {}",
                    script.name,
                    table
                );
            }
        }
    }

    #[tokio::test]
    async fn applying_twice_runs_every_statement_each_time() {
        let pipeline = MemoryPipeline::new(Arc::new(EntitySchema::standard()), Duration::ZERO);
        let script = SchemaScript::new("test", "CREATE TABLE IF NOT EXISTS a (id INT); SELECT 1;");

        let first = apply_schema(&pipeline.source(), &script).await.unwrap();
        let second = apply_schema(&pipeline.source(), &script).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.statements, 2);

        let (source, target) = pipeline.executed_statements().await;
        assert_eq!(source.len(), 4);
        assert!(target.is_empty());
    }

    #[tokio::test]
    async fn failure_carries_the_statement_and_cause() {
        let pipeline = MemoryPipeline::new(Arc::new(EntitySchema::standard()), Duration::ZERO);
        pipeline.set_source_down(true).await;
        let script = SchemaScript::new("broken", "CREATE TABLE IF NOT EXISTS a (id INT)");

        let err = apply_schema(&pipeline.source(), &script).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaApplyFailed);
        let detail = err.detail().unwrap();
        assert!(detail.contains("CREATE TABLE IF NOT EXISTS a"));
        assert!(detail.contains("simulated source is down"));
    }
}

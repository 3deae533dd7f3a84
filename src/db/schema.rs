//! Baseline schema application.

use std::path::Path;

use crate::db::SqlSession;
use crate::error::SchemaError;

/// True when the script opens with a psql backslash directive such as `\i` or `\copy`.
pub fn starts_with_meta_command(sql: &str) -> bool {
    sql.trim_start().starts_with('\\')
}

/// Read a schema file, rejecting missing or blank ones.
pub async fn load_schema(path: &Path) -> Result<String, SchemaError> {
    let sql = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SchemaError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
    if sql.trim().is_empty() {
        return Err(SchemaError::Empty {
            path: path.display().to_string(),
        });
    }
    Ok(sql)
}

/// Executes a schema script in a single transaction.
pub struct SchemaApplier;

impl SchemaApplier {
    pub async fn apply(session: &mut dyn SqlSession, sql: &str) -> Result<(), SchemaError> {
        if starts_with_meta_command(sql) {
            return Err(SchemaError::MetaCommand {
                origin: "Schema".to_string(),
            });
        }

        session
            .execute_in_transaction(sql, None)
            .await
            .map_err(SchemaError::Execution)?;
        tracing::info!(bytes = sql.len(), "Schema applied");
        Ok(())
    }
}

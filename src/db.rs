//! Embedded schema for the metadata store.

use sqlx::SqlitePool;

/// Full schema, embedded so the binary and tests can apply it without
/// depending on the working directory.
pub const SCHEMA_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Apply the embedded schema statement by statement.
///
/// SQLite executes one statement per query, so the file is split on `;`.
/// Every statement is `IF NOT EXISTS`, making this safe to re-run.
pub async fn apply_migrations(db: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = SCHEMA_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::debug!("applying {} schema statements", statements.len());

    for stmt in statements {
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

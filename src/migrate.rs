use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema on a fresh pool and close it again.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent DDL for the `gazettes` table.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gazettes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            publication_date TEXT NOT NULL,
            public_url TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_gazettes_publication_date ON gazettes(publication_date)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

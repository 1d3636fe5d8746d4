use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Creates the personality database if needed and applies the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent schema setup on an existing pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // VARCHAR lengths are advisory in SQLite; PersonalityStore enforces them.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS personalities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            personality_name VARCHAR(100) NOT NULL,
            system_prompt TEXT NOT NULL,
            system_prompt_rag TEXT NOT NULL,
            personality_title VARCHAR(100) NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_personalities_name ON personalities(personality_name)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

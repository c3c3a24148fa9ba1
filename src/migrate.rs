use anyhow::Result;

use crate::config::Config;
use crate::db;

/// Create every table in the cache database and the existence snapshot.
///
/// Idempotent. Timestamps are Unix seconds.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.storage.cache_db_path(), 1).await?;

    // Query tier: one row per normalized query
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_cache (
            query_key TEXT PRIMARY KEY,
            original_query TEXT NOT NULL,
            results_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Document tier: keyed by request hash, looked up by name
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readme_cache (
            request_hash TEXT PRIMARY KEY,
            package_name TEXT NOT NULL,
            markdown_content TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Artifact tier
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS package_cache (
            package_name TEXT PRIMARY KEY,
            zip_path TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_readme_cache_name ON readme_cache(package_name, created_at DESC)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_search_cache_created_at ON search_cache(created_at DESC)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;

    run_index_migrations(config).await
}

/// The existence snapshot lives in its own file so its mtime tracks refreshes.
pub async fn run_index_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.storage.index_db_path(), 1).await?;

    sqlx::query("CREATE TABLE IF NOT EXISTS packages (name TEXT PRIMARY KEY)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}

//! Document tier: generated READMEs keyed by request hash.
//!
//! Rows are also reachable by package name, most recent first. Each stored
//! document is mirrored to `<root>/packages/<name>/README.md`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use pkgmirage_core::error::{MirageError, MirageResult};
use pkgmirage_core::models::{DocumentSummary, ReadmeRequest};
use pkgmirage_core::query::canonical_name;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

pub struct DocumentCache {
    pool: SqlitePool,
    packages_dir: PathBuf,
}

impl DocumentCache {
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config.storage.cache_db_path(), 1).await?;
        Ok(Self {
            pool,
            packages_dir: config.storage.packages_dir(),
        })
    }

    pub async fn get(&self, request: &ReadmeRequest) -> MirageResult<Option<String>> {
        sqlx::query_scalar("SELECT markdown_content FROM readme_cache WHERE request_hash = ?")
            .bind(request.request_hash())
            .fetch_optional(&self.pool)
            .await
            .map_err(MirageError::cache)
    }

    /// Store `markdown` and mirror it to disk. Names that cannot be a
    /// directory are refused before anything is written.
    pub async fn put(&self, request: &ReadmeRequest, markdown: &str) -> MirageResult<()> {
        let name = super::storage_key(&request.name)?;
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO readme_cache (request_hash, package_name, markdown_content, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(request_hash) DO UPDATE SET
                package_name = excluded.package_name,
                markdown_content = excluded.markdown_content,
                created_at = excluded.created_at
            "#,
        )
        .bind(request.request_hash())
        .bind(&name)
        .bind(markdown)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(MirageError::cache)?;

        self.mirror(&name, markdown).await;
        Ok(())
    }

    async fn mirror(&self, name: &str, markdown: &str) {
        let dir = self.packages_dir.join(name);
        let result = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(dir.join("README.md"), markdown).await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(package = name, error = %e, "could not mirror README to disk");
        }
    }

    pub async fn has_by_name(&self, name: &str) -> MirageResult<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM readme_cache WHERE package_name = ? LIMIT 1")
                .bind(canonical_name(name))
                .fetch_optional(&self.pool)
                .await
                .map_err(MirageError::cache)?;
        Ok(found.is_some())
    }

    /// Most recent document stored for `name`.
    pub async fn latest_by_name(&self, name: &str) -> MirageResult<Option<String>> {
        sqlx::query_scalar(
            r#"
            SELECT markdown_content FROM readme_cache
            WHERE package_name = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(canonical_name(name))
        .fetch_optional(&self.pool)
        .await
        .map_err(MirageError::cache)
    }

    pub async fn list_names(&self) -> MirageResult<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT package_name, MAX(created_at) AS latest
            FROM readme_cache
            GROUP BY package_name
            ORDER BY latest DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(MirageError::cache)?;

        Ok(rows
            .iter()
            .map(|row| {
                let ts: i64 = row.get("latest");
                DocumentSummary {
                    package_name: row.get("package_name"),
                    latest: DateTime::from_timestamp(ts, 0).unwrap_or_default(),
                }
            })
            .collect())
    }

    pub async fn count(&self) -> MirageResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM readme_cache")
            .fetch_one(&self.pool)
            .await
            .map_err(MirageError::cache)
    }

    pub async fn clear(&self) -> MirageResult<u64> {
        let done = sqlx::query("DELETE FROM readme_cache")
            .execute(&self.pool)
            .await
            .map_err(MirageError::cache)?;
        Ok(done.rows_affected())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

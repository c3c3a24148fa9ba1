//! Artifact tier: package name → zip bundle on disk.

use std::path::PathBuf;

use chrono::Utc;
use pkgmirage_core::error::{MirageError, MirageResult};
use pkgmirage_core::query::canonical_name;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::offload::Offload;

pub struct ArtifactCache {
    pool: SqlitePool,
    packages_dir: PathBuf,
    offload: Offload,
}

impl ArtifactCache {
    pub async fn open(config: &Config, offload: Offload) -> anyhow::Result<Self> {
        let pool = db::connect(&config.storage.cache_db_path(), 1).await?;
        Ok(Self {
            pool,
            packages_dir: config.storage.packages_dir(),
            offload,
        })
    }

    async fn path_for(&self, name: &str) -> MirageResult<Option<PathBuf>> {
        let path: Option<String> =
            sqlx::query_scalar("SELECT zip_path FROM package_cache WHERE package_name = ?")
                .bind(canonical_name(name))
                .fetch_optional(&self.pool)
                .await
                .map_err(MirageError::cache)?;
        Ok(path.map(PathBuf::from))
    }

    /// Bundle bytes for `name`. A row whose file has vanished is deleted
    /// and reported as a miss.
    pub async fn get(&self, name: &str) -> MirageResult<Option<Vec<u8>>> {
        let Some(path) = self.path_for(name).await? else {
            return Ok(None);
        };

        let read_path = path.clone();
        let bytes = self
            .offload
            .run(move || match std::fs::read(&read_path) {
                Ok(b) => Ok(Some(b)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            })
            .await
            .map_err(MirageError::cache)?;

        if bytes.is_none() {
            tracing::info!(package = name, path = %path.display(), "cached bundle missing on disk, dropping row");
            self.delete(name).await?;
        }
        Ok(bytes)
    }

    pub async fn has_by_name(&self, name: &str) -> MirageResult<bool> {
        Ok(self
            .path_for(name)
            .await?
            .map(|p| p.exists())
            .unwrap_or(false))
    }

    /// Write the bundle under `packages/<name>/` and record its path.
    pub async fn put(&self, name: &str, bytes: Vec<u8>) -> MirageResult<PathBuf> {
        let canonical = super::storage_key(name)?;
        let dir = self.packages_dir.join(&canonical);
        let path = dir.join(format!("{}.zip", canonical));

        let write_path = path.clone();
        self.offload
            .run(move || {
                std::fs::create_dir_all(&dir)?;
                std::fs::write(&write_path, bytes)?;
                Ok(())
            })
            .await
            .map_err(MirageError::cache)?;

        sqlx::query(
            r#"
            INSERT INTO package_cache (package_name, zip_path, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(package_name) DO UPDATE SET
                zip_path = excluded.zip_path,
                created_at = excluded.created_at
            "#,
        )
        .bind(&canonical)
        .bind(path.to_string_lossy().to_string())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(MirageError::cache)?;

        tracing::info!(package = %canonical, path = %path.display(), "cached bundle");
        Ok(path)
    }

    async fn delete(&self, name: &str) -> MirageResult<()> {
        sqlx::query("DELETE FROM package_cache WHERE package_name = ?")
            .bind(canonical_name(name))
            .execute(&self.pool)
            .await
            .map_err(MirageError::cache)?;
        Ok(())
    }

    pub async fn count(&self) -> MirageResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM package_cache")
            .fetch_one(&self.pool)
            .await
            .map_err(MirageError::cache)
    }

    pub async fn clear(&self) -> MirageResult<u64> {
        let done = sqlx::query("DELETE FROM package_cache")
            .execute(&self.pool)
            .await
            .map_err(MirageError::cache)?;
        Ok(done.rows_affected())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

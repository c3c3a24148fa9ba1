//! Query tier: normalized query → serialized result set.

use chrono::{DateTime, Utc};
use pkgmirage_core::error::{MirageError, MirageResult};
use pkgmirage_core::models::{HistoryEntry, SearchResponse};
use pkgmirage_core::query::normalize_query;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

pub struct QueryCache {
    pool: SqlitePool,
}

impl QueryCache {
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config.storage.cache_db_path(), 1).await?;
        Ok(Self { pool })
    }

    pub async fn get(&self, query: &str) -> MirageResult<Option<SearchResponse>> {
        let key = normalize_query(query);
        let row: Option<String> =
            sqlx::query_scalar("SELECT results_json FROM search_cache WHERE query_key = ?")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await
                .map_err(MirageError::cache)?;

        match row {
            Some(json) => match serde_json::from_str(&json) {
                Ok(resp) => Ok(Some(resp)),
                Err(e) => {
                    tracing::warn!(query = %key, error = %e, "corrupt query cache row, treating as miss");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Upsert: one row per normalized query, last write wins.
    pub async fn put(&self, query: &str, response: &SearchResponse) -> MirageResult<()> {
        let key = normalize_query(query);
        let json = serde_json::to_string(response).map_err(MirageError::cache)?;
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO search_cache (query_key, original_query, results_json, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(query_key) DO UPDATE SET
                original_query = excluded.original_query,
                results_json = excluded.results_json,
                created_at = excluded.created_at
            "#,
        )
        .bind(&key)
        .bind(query)
        .bind(&json)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(MirageError::cache)?;

        tracing::debug!(query = %key, results = response.results.len(), "cached search results");
        Ok(())
    }

    /// Every cached result set, newest first. Corrupt rows are skipped.
    pub async fn all(&self) -> MirageResult<Vec<SearchResponse>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT results_json FROM search_cache ORDER BY created_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(MirageError::cache)?;

        Ok(rows
            .iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect())
    }

    pub async fn history(&self) -> MirageResult<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT original_query, results_json, created_at
            FROM search_cache
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(MirageError::cache)?;

        Ok(rows
            .iter()
            .map(|row| {
                let json: String = row.get("results_json");
                let count = serde_json::from_str::<SearchResponse>(&json)
                    .map(|r| r.results.len())
                    .unwrap_or(0);
                let ts: i64 = row.get("created_at");
                HistoryEntry {
                    query: row.get("original_query"),
                    count,
                    created_at: DateTime::from_timestamp(ts, 0).unwrap_or_default(),
                }
            })
            .collect())
    }

    pub async fn count(&self) -> MirageResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM search_cache")
            .fetch_one(&self.pool)
            .await
            .map_err(MirageError::cache)
    }

    pub async fn clear(&self) -> MirageResult<u64> {
        let done = sqlx::query("DELETE FROM search_cache")
            .execute(&self.pool)
            .await
            .map_err(MirageError::cache)?;
        Ok(done.rows_affected())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations;
    use pkgmirage_core::models::PackageRecord;
    use tempfile::TempDir;

    async fn open(tmp: &TempDir) -> QueryCache {
        let config = Config::with_root(tmp.path());
        run_migrations(&config).await.unwrap();
        QueryCache::open(&config).await.unwrap()
    }

    fn response(query: &str, names: &[&str]) -> SearchResponse {
        SearchResponse::new(
            query,
            names
                .iter()
                .map(|n| PackageRecord::verified(n, false, false))
                .collect(),
        )
    }

    #[tokio::test]
    async fn round_trip_uses_normalized_key() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp).await;
        let resp = response("Terminal Text Editors", &["prompt-toolkit", "textual"]);
        cache.put("Terminal Text Editors", &resp).await.unwrap();

        let hit = cache.get("  terminal text EDITORS ").await.unwrap().unwrap();
        assert_eq!(hit, resp);
        assert!(cache.get("something else").await.unwrap().is_none());
        cache.close().await;
    }

    #[tokio::test]
    async fn put_overwrites_instead_of_appending() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp).await;
        cache.put("q", &response("q", &["a"])).await.unwrap();
        cache.put("Q", &response("Q", &["b", "c"])).await.unwrap();

        assert_eq!(cache.count().await.unwrap(), 1);
        let hit = cache.get("q").await.unwrap().unwrap();
        assert_eq!(hit.names(), vec!["b", "c"]);

        let history = cache.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].query, "Q");
        assert_eq!(history[0].count, 2);
        cache.close().await;
    }

    #[tokio::test]
    async fn all_and_clear() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp).await;
        cache.put("one", &response("one", &["a"])).await.unwrap();
        cache.put("two", &response("two", &["b"])).await.unwrap();
        assert_eq!(cache.all().await.unwrap().len(), 2);

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(cache.all().await.unwrap().is_empty());
        cache.close().await;
    }

    #[tokio::test]
    async fn corrupt_row_reads_as_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp).await;
        sqlx::query(
            "INSERT INTO search_cache (query_key, original_query, results_json, created_at) VALUES ('bad', 'bad', '{not json', 0)",
        )
        .execute(&cache.pool)
        .await
        .unwrap();
        assert!(cache.get("bad").await.unwrap().is_none());
        cache.close().await;
    }
}

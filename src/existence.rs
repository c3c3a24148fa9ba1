//! Ground-truth index of package names that really exist.
//!
//! The snapshot is a single-table SQLite file (`index.sqlite`) whose mtime
//! records the last successful refresh. An in-memory `HashSet` mirrors it
//! for lookups.
//!
//! # Startup policy
//!
//! | Snapshot | Action |
//! |----------|--------|
//! | missing or empty | serve "not found", refresh in the background |
//! | older than `index.staleness_hours` | serve it, refresh in the background |
//! | fresh | serve it |
//!
//! Opening the index creates the file, so a first run reads as `Empty`.
//! `Missing` is only seen when the file disappears while the process runs;
//! both get the same startup action.
//!
//! A refresh is one bulk fetch followed by a delete-then-insert inside a
//! transaction. A failed fetch leaves the previous snapshot untouched. At
//! most one refresh runs at a time; a second trigger is a logged no-op.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use async_trait::async_trait;
use pkgmirage_core::error::{MirageError, MirageResult};
use pkgmirage_core::existence::{ExistenceCheck, NameSource};
use pkgmirage_core::query::canonical_name;
use regex::Regex;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;

use crate::config::{Config, IndexConfig};
use crate::db;
use crate::offload::Offload;

/// Rows per multi-value INSERT during a refresh.
const INSERT_CHUNK: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    Missing,
    Empty,
    Stale { age: Duration },
    Fresh { age: Duration },
}

impl SnapshotStatus {
    pub fn needs_refresh(&self) -> bool {
        !matches!(self, SnapshotStatus::Fresh { .. })
    }

    pub fn has_data(&self) -> bool {
        matches!(
            self,
            SnapshotStatus::Stale { .. } | SnapshotStatus::Fresh { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            SnapshotStatus::Missing => "missing",
            SnapshotStatus::Empty => "empty",
            SnapshotStatus::Stale { .. } => "stale",
            SnapshotStatus::Fresh { .. } => "fresh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { count: usize },
    /// Another refresh held the guard.
    AlreadyRunning,
}

pub struct ExistenceIndex {
    pool: SqlitePool,
    path: PathBuf,
    names: RwLock<HashSet<String>>,
    refreshing: AtomicBool,
    source: Arc<dyn NameSource>,
    staleness: Duration,
    offload: Offload,
}

impl ExistenceIndex {
    /// Open the snapshot file. Nothing is loaded until [`Self::startup`]
    /// or [`Self::load`].
    pub async fn open(
        config: &Config,
        source: Arc<dyn NameSource>,
        offload: Offload,
    ) -> Result<Arc<Self>> {
        let path = config.storage.index_db_path();
        let pool = db::connect(&path, 1).await?;
        sqlx::query("CREATE TABLE IF NOT EXISTS packages (name TEXT PRIMARY KEY)")
            .execute(&pool)
            .await?;

        Ok(Arc::new(Self {
            pool,
            path,
            names: RwLock::new(HashSet::new()),
            refreshing: AtomicBool::new(false),
            source,
            staleness: Duration::from_secs(config.index.staleness_hours * 3600),
            offload,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source_label(&self) -> String {
        self.source.describe()
    }

    pub async fn row_count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM packages")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Classify the persisted snapshot by row count and file age.
    pub async fn status(&self) -> Result<SnapshotStatus> {
        let modified = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.modified()?,
            Err(_) => return Ok(SnapshotStatus::Missing),
        };
        if self.row_count().await? == 0 {
            return Ok(SnapshotStatus::Empty);
        }
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > self.staleness {
            Ok(SnapshotStatus::Stale { age })
        } else {
            Ok(SnapshotStatus::Fresh { age })
        }
    }

    /// Replace the in-memory mirror with the persisted snapshot.
    pub async fn load(&self) -> Result<usize> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT name FROM packages")
            .fetch_all(&self.pool)
            .await?;
        let set: HashSet<String> = rows.into_iter().collect();
        let n = set.len();
        self.replace_names(set);
        tracing::info!(names = n, "existence snapshot loaded");
        Ok(n)
    }

    pub fn len(&self) -> usize {
        self.names.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    fn replace_names(&self, set: HashSet<String>) {
        match self.names.write() {
            Ok(mut guard) => *guard = set,
            Err(poisoned) => *poisoned.into_inner() = set,
        }
    }

    /// Fetch the full name list and replace the snapshot wholesale.
    pub async fn refresh(&self) -> MirageResult<RefreshOutcome> {
        if !self.try_claim() {
            tracing::info!("existence refresh already in flight, skipping");
            return Ok(RefreshOutcome::AlreadyRunning);
        }
        self.run_claimed().await
    }

    fn try_claim(&self) -> bool {
        self.refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Caller must hold the guard; it is released here.
    async fn run_claimed(&self) -> MirageResult<RefreshOutcome> {
        let result = self.refresh_inner().await;
        self.refreshing.store(false, Ordering::SeqCst);

        match &result {
            Ok(count) => tracing::info!(names = count, "existence snapshot refreshed"),
            Err(e) => tracing::warn!(error = %e, "existence refresh failed, keeping previous snapshot"),
        }
        result.map(|count| RefreshOutcome::Refreshed { count })
    }

    async fn refresh_inner(&self) -> MirageResult<usize> {
        tracing::info!(source = %self.source.describe(), "fetching existence names");
        let fetched = self.source.fetch_all().await?;
        let names: HashSet<String> = fetched
            .iter()
            .map(|n| canonical_name(n))
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return Err(MirageError::existence("source returned no names"));
        }

        let mut tx = self.pool.begin().await.map_err(MirageError::cache)?;
        sqlx::query("DELETE FROM packages")
            .execute(&mut *tx)
            .await
            .map_err(MirageError::cache)?;

        let ordered: Vec<&String> = names.iter().collect();
        for chunk in ordered.chunks(INSERT_CHUNK) {
            let mut builder =
                sqlx::QueryBuilder::<sqlx::Sqlite>::new("INSERT OR IGNORE INTO packages (name) ");
            builder.push_values(chunk, |mut b, name| {
                b.push_bind(name.as_str());
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(MirageError::cache)?;
        }
        tx.commit().await.map_err(MirageError::cache)?;

        // The WAL may not have been checkpointed yet, so stamp the file.
        let path = self.path.clone();
        if let Err(e) = self.offload.run(move || Ok(touch(&path)?)).await {
            tracing::debug!(error = %e, "could not stamp snapshot mtime");
        }

        let count = names.len();
        self.replace_names(names);
        Ok(count)
    }

    /// Run [`Self::refresh`] as a detached task unless one is in flight.
    ///
    /// The guard is taken before the task is spawned, so a second call
    /// right after this one is already a no-op.
    pub fn spawn_refresh(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.try_claim() {
            tracing::info!("existence refresh already in flight");
            return None;
        }
        let index = Arc::clone(self);
        Some(tokio::spawn(async move {
            let _ = index.run_claimed().await;
        }))
    }

    /// Apply the startup policy. Returns the status seen and the background
    /// refresh, if one was started.
    pub async fn startup(self: &Arc<Self>) -> Result<(SnapshotStatus, Option<JoinHandle<()>>)> {
        let status = self.status().await?;
        let handle = match status {
            SnapshotStatus::Missing | SnapshotStatus::Empty => {
                tracing::warn!(
                    status = status.label(),
                    "no existence snapshot, every name reads as unknown until refresh completes"
                );
                self.spawn_refresh()
            }
            SnapshotStatus::Stale { age } => {
                self.load().await?;
                tracing::info!(age_hours = age.as_secs() / 3600, "existence snapshot stale, revalidating");
                self.spawn_refresh()
            }
            SnapshotStatus::Fresh { .. } => {
                self.load().await?;
                None
            }
        };
        Ok((status, handle))
    }

    /// Re-check the snapshot; trigger one refresh if it needs one.
    pub async fn revalidate(self: &Arc<Self>) -> Result<Option<JoinHandle<()>>> {
        let status = self.status().await?;
        if status.needs_refresh() {
            Ok(self.spawn_refresh())
        } else {
            Ok(None)
        }
    }

    /// Revalidate on a fixed interval for the lifetime of the server.
    pub fn spawn_periodic_check(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let index = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = index.revalidate().await {
                    tracing::warn!(error = %e, "existence revalidation check failed");
                }
            }
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl ExistenceCheck for ExistenceIndex {
    fn exists(&self, name: &str) -> bool {
        self.names
            .read()
            .map(|s| s.contains(&canonical_name(name)))
            .unwrap_or(false)
    }
}

fn touch(path: &Path) -> std::io::Result<()> {
    let f = std::fs::OpenOptions::new().write(true).open(path)?;
    f.set_modified(SystemTime::now())
}

fn simple_index_link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<a href="/simple/([^/]+)/">"#).expect("static regex"))
}

/// Extract project names from a PEP 503 simple-index HTML page.
pub fn parse_simple_index(html: &str) -> Vec<String> {
    simple_index_link()
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect()
}

/// Bulk source backed by the package index's simple API.
pub struct SimpleIndexSource {
    client: reqwest::Client,
    url: String,
    offload: Offload,
}

impl SimpleIndexSource {
    pub fn new(config: &IndexConfig, offload: Offload) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.source_url.clone(),
            offload,
        })
    }
}

#[async_trait]
impl NameSource for SimpleIndexSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch_all(&self) -> MirageResult<Vec<String>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(MirageError::existence)?;
        let status = response.status();
        if !status.is_success() {
            return Err(MirageError::existence(format!("HTTP {}", status)));
        }
        let body = response.text().await.map_err(MirageError::existence)?;

        self.offload
            .run(move || Ok(parse_simple_index(&body)))
            .await
            .map_err(MirageError::existence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgmirage_core::testing::StaticNameSource;
    use tempfile::TempDir;

    async fn open_with(tmp: &TempDir, source: Arc<StaticNameSource>) -> Arc<ExistenceIndex> {
        let config = Config::with_root(tmp.path());
        ExistenceIndex::open(&config, source, Offload::new(1))
            .await
            .unwrap()
    }

    fn age_file(path: &Path, by: Duration) {
        let f = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        f.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn parses_simple_index_links() {
        let html = r#"<html><body>
            <a href="/simple/requests/">requests</a>
            <a href="/simple/prompt-toolkit/">prompt-toolkit</a>
            <a href="https://elsewhere/">nope</a>
        </body></html>"#;
        assert_eq!(parse_simple_index(html), vec!["requests", "prompt-toolkit"]);
    }

    #[tokio::test]
    async fn empty_snapshot_triggers_refresh() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(StaticNameSource::new(["Prompt_Toolkit", "textual"]));
        let index = open_with(&tmp, source.clone()).await;

        let (status, handle) = index.startup().await.unwrap();
        assert_eq!(status, SnapshotStatus::Empty);
        handle.expect("refresh spawned").await.unwrap();

        assert_eq!(source.fetch_count(), 1);
        assert!(index.exists("prompt-toolkit"));
        assert!(index.exists("TEXTUAL"));
        assert!(!index.exists("fakepkg123"));
        assert_eq!(index.row_count().await.unwrap(), 2);
        index.close().await;
    }

    #[tokio::test]
    async fn vanished_file_reads_as_missing() {
        let tmp = TempDir::new().unwrap();
        let index = open_with(&tmp, Arc::new(StaticNameSource::new(["rich"]))).await;
        assert_eq!(index.status().await.unwrap(), SnapshotStatus::Empty);

        std::fs::remove_file(tmp.path().join("index.sqlite")).unwrap();
        let status = index.status().await.unwrap();
        assert_eq!(status, SnapshotStatus::Missing);
        assert!(status.needs_refresh());
        index.close().await;
    }

    #[tokio::test]
    async fn fresh_snapshot_is_served_without_fetch() {
        let tmp = TempDir::new().unwrap();
        let seed = Arc::new(StaticNameSource::new(["rich"]));
        let index = open_with(&tmp, seed).await;
        index.refresh().await.unwrap();
        index.close().await;

        let source = Arc::new(StaticNameSource::new(["other"]));
        let index = open_with(&tmp, source.clone()).await;
        let (status, handle) = index.startup().await.unwrap();
        assert!(matches!(status, SnapshotStatus::Fresh { .. }));
        assert!(handle.is_none());
        assert_eq!(source.fetch_count(), 0);
        assert!(index.exists("rich"));
        index.close().await;
    }

    #[tokio::test]
    async fn stale_snapshot_serves_then_refreshes_once() {
        let tmp = TempDir::new().unwrap();
        let seed = Arc::new(StaticNameSource::new(["rich"]));
        let index = open_with(&tmp, seed).await;
        index.refresh().await.unwrap();
        index.close().await;
        age_file(&tmp.path().join("index.sqlite"), Duration::from_secs(48 * 3600));

        let source = Arc::new(StaticNameSource::new(["rich", "textual"]));
        let index = open_with(&tmp, source.clone()).await;
        let (status, handle) = index.startup().await.unwrap();
        assert!(matches!(status, SnapshotStatus::Stale { .. }));
        // Stale data is already being served.
        assert!(index.exists("rich"));

        handle.expect("refresh spawned").await.unwrap();
        assert_eq!(source.fetch_count(), 1);
        assert!(index.exists("textual"));
        assert!(matches!(
            index.status().await.unwrap(),
            SnapshotStatus::Fresh { .. }
        ));
        index.close().await;
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let tmp = TempDir::new().unwrap();
        let seed = Arc::new(StaticNameSource::new(["rich"]));
        let index = open_with(&tmp, seed).await;
        index.refresh().await.unwrap();
        index.close().await;

        let index = open_with(&tmp, Arc::new(StaticNameSource::failing())).await;
        index.load().await.unwrap();
        let err = index.refresh().await.unwrap_err();
        assert!(matches!(err, MirageError::ExistenceSource(_)));
        assert!(index.exists("rich"));
        assert_eq!(index.row_count().await.unwrap(), 1);
        assert!(!index.is_refreshing());
        index.close().await;
    }

    #[tokio::test]
    async fn empty_source_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let index = open_with(&tmp, Arc::new(StaticNameSource::new(Vec::<String>::new()))).await;
        assert!(index.refresh().await.is_err());
        index.close().await;
    }

    #[tokio::test]
    async fn concurrent_refresh_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let index = open_with(&tmp, Arc::new(StaticNameSource::new(["rich"]))).await;
        index.refreshing.store(true, Ordering::SeqCst);
        assert_eq!(
            index.refresh().await.unwrap(),
            RefreshOutcome::AlreadyRunning
        );
        assert!(index.spawn_refresh().is_none());
        index.refreshing.store(false, Ordering::SeqCst);
        index.close().await;
    }
}

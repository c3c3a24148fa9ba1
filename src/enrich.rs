//! Authoritative metadata for verified records.
//!
//! After the resolver has built its list, each verified placeholder is
//! looked up with a [`MetadataProvider`]. Lookups run concurrently,
//! capped by a semaphore. A found project replaces the stand-in fields and
//! its long description goes into the document tier; a project that turns
//! out not to exist is flipped to `package_exists = false`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use pkgmirage_core::error::{MirageError, MirageResult};
use pkgmirage_core::models::{PackageRecord, ReadmeRequest, PENDING_VERSION};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::DocumentCache;

/// The `info` object of a package-index JSON response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProjectMetadata {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub home_page: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub requires_python: Option<String>,
    #[serde(default)]
    pub package_url: Option<String>,
    #[serde(default)]
    pub project_urls: Option<BTreeMap<String, String>>,
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// `Ok(None)` means the project does not exist.
    async fn lookup(&self, name: &str) -> MirageResult<Option<ProjectMetadata>>;
}

/// `GET {base_url}/{name}/json` against the package index.
pub struct PypiJsonProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct JsonEnvelope {
    info: ProjectMetadata,
}

impl PypiJsonProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://pypi.org/pypi";

    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MetadataProvider for PypiJsonProvider {
    async fn lookup(&self, name: &str) -> MirageResult<Option<ProjectMetadata>> {
        let url = format!("{}/{}/json", self.base_url, name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(MirageError::existence)?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(MirageError::existence(format!("{} returned {}", url, status)));
        }
        let envelope: JsonEnvelope = response.json().await.map_err(MirageError::existence)?;
        Ok(Some(envelope.info))
    }
}

pub struct Enricher {
    provider: Arc<dyn MetadataProvider>,
    limit: Arc<Semaphore>,
}

impl Enricher {
    pub fn new(provider: Arc<dyn MetadataProvider>, concurrency: usize) -> Self {
        Self {
            provider,
            limit: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Enrich the verified records in `records`, keeping order.
    ///
    /// Fabricated records are untouched. A lookup error leaves the
    /// placeholder in place.
    pub async fn enrich(&self, mut records: Vec<PackageRecord>, documents: &DocumentCache) -> Vec<PackageRecord> {
        let mut tasks = JoinSet::new();
        for (i, record) in records.iter().enumerate() {
            if !record.package_exists {
                continue;
            }
            let provider = Arc::clone(&self.provider);
            let limit = Arc::clone(&self.limit);
            let name = record.name.clone();
            tasks.spawn(async move {
                let _permit = limit.acquire_owned().await;
                (i, provider.lookup(&name).await)
            });
        }

        let mut found: HashMap<usize, MirageResult<Option<ProjectMetadata>>> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, result)) => {
                    found.insert(i, result);
                }
                Err(e) => tracing::warn!(error = %e, "metadata lookup task failed"),
            }
        }

        for (i, record) in records.iter_mut().enumerate() {
            match found.remove(&i) {
                Some(Ok(Some(meta))) => apply(record, meta, documents).await,
                Some(Ok(None)) => {
                    tracing::info!(package = %record.name, "not found upstream, marking as fabricated");
                    record.package_exists = false;
                    record.readme_cached = false;
                    record.package_cached = false;
                }
                Some(Err(e)) => {
                    tracing::warn!(package = %record.name, error = %e, "metadata lookup failed");
                }
                None => {}
            }
        }
        records
    }
}

async fn apply(record: &mut PackageRecord, meta: ProjectMetadata, documents: &DocumentCache) {
    record.version = meta.version.unwrap_or_else(|| PENDING_VERSION.to_string());
    record.summary = meta.summary;
    record.description = meta.description.clone();
    record.author = meta.author;
    record.home_page = meta.home_page;
    record.license = meta.license;
    record.requires_python = meta.requires_python;
    record.package_url = meta.package_url;
    record.project_urls = meta.project_urls.unwrap_or_default();

    let readme = meta.description.filter(|d| !d.trim().is_empty());
    match readme {
        Some(markdown) => {
            let request = ReadmeRequest {
                name: record.name.clone(),
                summary: record.summary.clone(),
                description: record.description.clone(),
                install_cmd: Some(String::new()),
                ..Default::default()
            };
            match documents.put(&request, &markdown).await {
                Ok(()) => record.readme_cached = true,
                Err(e) => tracing::warn!(package = %record.name, error = %e, "could not cache upstream README"),
            }
        }
        None => {
            record.readme_cached = documents.has_by_name(&record.name).await.unwrap_or(false);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Config;
    use crate::migrate::run_migrations;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Fixed answers per name; unknown names are not found.
    pub(crate) struct FixedProvider {
        pub answers: HashMap<String, ProjectMetadata>,
        pub failing: Vec<String>,
        pub in_flight: AtomicUsize,
        pub peak: AtomicUsize,
        pub seen: Mutex<Vec<String>>,
    }

    impl FixedProvider {
        pub fn new(answers: &[(&str, &str)]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(n, d)| {
                        (
                            n.to_string(),
                            ProjectMetadata {
                                version: Some("1.0.0".into()),
                                summary: Some(format!("{} summary", n)),
                                description: Some(d.to_string()),
                                ..Default::default()
                            },
                        )
                    })
                    .collect(),
                failing: Vec::new(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MetadataProvider for FixedProvider {
        async fn lookup(&self, name: &str) -> MirageResult<Option<ProjectMetadata>> {
            self.seen.lock().unwrap().push(name.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.failing.iter().any(|f| f == name) {
                return Err(MirageError::existence("timeout"));
            }
            Ok(self.answers.get(name).cloned())
        }
    }

    async fn documents(tmp: &TempDir) -> DocumentCache {
        let config = Config::with_root(tmp.path());
        run_migrations(&config).await.unwrap();
        DocumentCache::open(&config).await.unwrap()
    }

    fn fabricated(name: &str) -> PackageRecord {
        let mut r = PackageRecord::verified(name, false, false);
        r.package_exists = false;
        r.version = "0.1.0".into();
        r
    }

    #[tokio::test]
    async fn enriches_verified_and_skips_fabricated() {
        let tmp = TempDir::new().unwrap();
        let docs = documents(&tmp).await;
        let provider = Arc::new(FixedProvider::new(&[("rich", "# Rich\nlong readme")]));
        let enricher = Enricher::new(provider.clone(), 10);

        let records = vec![
            PackageRecord::verified("rich", false, false),
            fabricated("fakepkg123"),
        ];
        let out = enricher.enrich(records, &docs).await;

        assert_eq!(out[0].version, "1.0.0");
        assert_eq!(out[0].summary.as_deref(), Some("rich summary"));
        assert!(out[0].readme_cached);
        assert!(!out[0].is_pending());
        assert_eq!(out[1].name, "fakepkg123");
        assert_eq!(*provider.seen.lock().unwrap(), vec!["rich"]);
        assert_eq!(
            docs.latest_by_name("rich").await.unwrap().as_deref(),
            Some("# Rich\nlong readme")
        );
        docs.close().await;
    }

    #[tokio::test]
    async fn not_found_flips_existence_and_errors_keep_placeholder() {
        let tmp = TempDir::new().unwrap();
        let docs = documents(&tmp).await;
        let mut provider = FixedProvider::new(&[]);
        provider.failing.push("flaky".into());
        let enricher = Enricher::new(Arc::new(provider), 10);

        let out = enricher
            .enrich(
                vec![
                    PackageRecord::verified("gone", true, true),
                    PackageRecord::verified("flaky", false, false),
                ],
                &docs,
            )
            .await;

        assert!(!out[0].package_exists);
        assert!(!out[0].readme_cached);
        assert!(!out[0].package_cached);
        assert!(out[1].package_exists);
        assert!(out[1].is_pending());
        docs.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_capped() {
        let tmp = TempDir::new().unwrap();
        let docs = documents(&tmp).await;
        let names: Vec<String> = (0..12).map(|i| format!("pkg{}", i)).collect();
        let provider = Arc::new(FixedProvider::new(&[]));
        let enricher = Enricher::new(provider.clone(), 3);

        let records = names
            .iter()
            .map(|n| PackageRecord::verified(n, false, false))
            .collect();
        let out = enricher.enrich(records, &docs).await;

        assert_eq!(out.len(), 12);
        assert!(provider.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(provider.seen.lock().unwrap().len(), 12);
        docs.close().await;
    }
}

//! Process wiring.
//!
//! An [`App`] owns every store and collaborator for one process: the three
//! cache tiers, the existence index, the completer, the audit log and the
//! blocking-work boundary. The CLI opens one per command; the server opens
//! one and shares it behind an `Arc`. Nothing here is global.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use pkgmirage_core::error::{MirageError, MirageResult};
use pkgmirage_core::existence::{ExistenceCheck, NameSource};
use pkgmirage_core::llm::Completer;
use pkgmirage_core::models::{ReadmeRequest, SearchResponse};
use pkgmirage_core::query::is_valid_package_name;
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::artifact::{ArtifactBuilder, BundleMetadata, StubArtifactBuilder};
use crate::audit::AuditLog;
use crate::cache::CacheTiers;
use crate::config::Config;
use crate::enrich::{Enricher, MetadataProvider, PypiJsonProvider};
use crate::existence::{ExistenceIndex, SimpleIndexSource, SnapshotStatus};
use crate::generator::CandidateGenerator;
use crate::llm::create_completer;
use crate::migrate::run_migrations;
use crate::offload::Offload;
use crate::readme::{self, Readme};
use crate::repair::RepairPipeline;
use crate::resolver::Resolver;
use crate::synth::MetadataSynthesizer;

/// What to do with the existence snapshot on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Apply the startup policy: load what is there and refresh in the
    /// background when missing, empty or stale.
    Revalidate,
    /// Load what is there. Never touches the network.
    LoadOnly,
}

/// Request body of `POST /generate_package`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneratePackageRequest {
    #[serde(default)]
    pub readme_markdown: String,
    #[serde(default)]
    pub metadata: BundleMetadata,
}

/// Collaborators that tests replace with doubles.
pub struct Collaborators {
    pub completer: Arc<dyn Completer>,
    pub names: Arc<dyn NameSource>,
    pub metadata: Arc<dyn MetadataProvider>,
    pub builder: Arc<dyn ArtifactBuilder>,
}

pub struct App {
    pub config: Arc<Config>,
    pub offload: Offload,
    pub audit: AuditLog,
    pub completer: Arc<dyn Completer>,
    pub caches: Arc<CacheTiers>,
    pub index: Arc<ExistenceIndex>,
    resolver: Resolver,
    enricher: Enricher,
    builder: Arc<dyn ArtifactBuilder>,
    startup: SnapshotStatus,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    /// Open with the real HTTP collaborators.
    ///
    /// # Errors
    ///
    /// Migrations fail, or the configured provider cannot be built (the
    /// `openai` provider without its key variable set).
    pub async fn open(config: Config, mode: IndexMode) -> Result<Self> {
        let offload = Offload::new(config.search.worker_threads);
        let audit = match &config.audit.path {
            Some(path) => AuditLog::to_file(path).0,
            None => AuditLog::disabled(),
        };
        let completer = create_completer(&config.llm, audit.clone())?;
        let names = Arc::new(SimpleIndexSource::new(&config.index, offload.clone())?);
        let metadata = Arc::new(PypiJsonProvider::new(
            PypiJsonProvider::DEFAULT_BASE_URL,
            std::time::Duration::from_secs(config.index.fetch_timeout_secs),
        )?);

        let collaborators = Collaborators {
            completer,
            names,
            metadata,
            builder: Arc::new(StubArtifactBuilder),
        };
        Self::open_with(config, mode, offload, audit, collaborators).await
    }

    pub async fn open_with(
        config: Config,
        mode: IndexMode,
        offload: Offload,
        audit: AuditLog,
        collaborators: Collaborators,
    ) -> Result<Self> {
        run_migrations(&config)
            .await
            .context("Failed to prepare storage")?;

        let caches = Arc::new(CacheTiers::open(&config, offload.clone()).await?);
        let index = ExistenceIndex::open(&config, collaborators.names, offload.clone()).await?;

        let mut background = Vec::new();
        let startup = match mode {
            IndexMode::Revalidate => {
                let (status, handle) = index.startup().await?;
                background.extend(handle);
                status
            }
            IndexMode::LoadOnly => {
                let status = index.status().await?;
                if status.has_data() {
                    index.load().await?;
                }
                status
            }
        };

        let completer = collaborators.completer;
        let resolver = Resolver::new(
            CandidateGenerator::new(completer.clone(), config.search.max_rounds),
            MetadataSynthesizer::new(
                completer.clone(),
                RepairPipeline::new(completer.clone(), audit.clone()),
                config.search.batch_size,
            ),
            index.clone() as Arc<dyn ExistenceCheck>,
            caches.clone(),
        );
        let enricher = Enricher::new(collaborators.metadata, config.search.enrich_concurrency);

        Ok(Self {
            config: Arc::new(config),
            offload,
            audit,
            completer,
            caches,
            index,
            resolver,
            enricher,
            builder: collaborators.builder,
            startup,
            background: Mutex::new(background),
        })
    }

    /// Snapshot status seen at open.
    pub fn startup_status(&self) -> SnapshotStatus {
        self.startup
    }

    /// Track a task so [`App::close`] can stop it.
    pub fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.background.lock() {
            tasks.push(handle);
        }
    }

    /// Resolve `query`, enriching verified records when `enrich` is set.
    ///
    /// # Errors
    ///
    /// Only [`MirageError::Config`]: the provider is disabled and the query
    /// is neither blank nor already cached.
    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        enrich: bool,
    ) -> MirageResult<SearchResponse> {
        let limit = self.config.search.effective_limit(limit);

        if !self.completer.is_enabled() && !query.trim().is_empty() {
            return match self.caches.queries.get(query.trim()).await {
                Ok(Some(hit)) => Ok(hit.truncated(limit)),
                _ => Err(MirageError::Config(
                    "no generative provider configured; set [llm] provider".into(),
                )),
            };
        }

        let enricher = enrich.then_some(&self.enricher);
        Ok(self.resolver.resolve_with(query, limit, enricher).await)
    }

    /// # Errors
    ///
    /// [`MirageError::InvalidName`] for a name that is not a package name,
    /// and [`MirageError::Config`] when nothing is cached and the provider is
    /// disabled.
    pub async fn readme(&self, request: &ReadmeRequest) -> MirageResult<Readme> {
        if !is_valid_package_name(request.name.trim()) {
            return Err(MirageError::InvalidName(request.name.clone()));
        }
        if !self.completer.is_enabled() {
            if let Ok(Some(markdown)) = self.caches.documents.get(request).await {
                return Ok(Readme {
                    markdown,
                    source: readme::ReadmeSource::Cached,
                });
            }
            return Err(MirageError::Config(
                "no generative provider configured; set [llm] provider".into(),
            ));
        }
        Ok(readme::generate(self.completer.as_ref(), &self.caches.documents, request).await)
    }

    /// Zip bytes for the bundle, from the artifact tier when present.
    ///
    /// An unusable `metadata.name` fails with [`MirageError::InvalidName`]
    /// before anything is built or written.
    pub async fn generate_package(&self, request: GeneratePackageRequest) -> Result<Vec<u8>> {
        let name = request.metadata.package_name().to_string();
        if !is_valid_package_name(&name) {
            return Err(MirageError::InvalidName(name).into());
        }
        match self.caches.artifacts.get(&name).await {
            Ok(Some(bytes)) => {
                tracing::info!(package = %name, "artifact cache hit");
                return Ok(bytes);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "artifact tier unavailable"),
        }

        let builder = Arc::clone(&self.builder);
        let GeneratePackageRequest {
            readme_markdown,
            metadata,
        } = request;
        let bytes = self
            .offload
            .run(move || builder.build(&metadata, &readme_markdown))
            .await
            .with_context(|| format!("Failed to build bundle for {}", name))?;

        if let Err(e) = self.caches.artifacts.put(&name, bytes.clone()).await {
            tracing::warn!(package = %name, error = %e, "could not cache bundle");
        }
        Ok(bytes)
    }

    /// Stop background tasks and close every pool.
    pub async fn close(&self) {
        if let Ok(mut tasks) = self.background.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        self.caches.close().await;
        self.index.close().await;
    }
}

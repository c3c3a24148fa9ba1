//! The three persistent cache tiers.
//!
//! | Tier | Key | Value |
//! |------|-----|-------|
//! | [`QueryCache`] | normalized query | serialized [`SearchResponse`](pkgmirage_core::models::SearchResponse) |
//! | [`DocumentCache`] | request hash (secondary: package name) | Markdown |
//! | [`ArtifactCache`] | package name | path to a zip bundle |
//!
//! The tiers share one database file but each holds its own single
//! connection. Writes to the same key are last-write-wins.
//!
//! The document and artifact tiers write files under
//! `<root>/packages/<canonical-name>/`, so both refuse names that fail
//! [`is_valid_package_name`].

mod artifact;
mod document;
mod query;

pub use artifact::ArtifactCache;
pub use document::DocumentCache;
pub use query::QueryCache;

use std::str::FromStr;

use pkgmirage_core::error::{MirageError, MirageResult};
use pkgmirage_core::models::Availability;
use pkgmirage_core::query::{canonical_name, is_valid_package_name};
use serde::Serialize;

use crate::config::Config;
use crate::offload::Offload;

/// Canonical form of `name`, usable as a directory under `packages/`.
fn storage_key(name: &str) -> MirageResult<String> {
    let canonical = canonical_name(name);
    if is_valid_package_name(&canonical) {
        Ok(canonical)
    } else {
        Err(MirageError::Cache(format!(
            "refusing to store files for package name {:?}",
            name
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Search,
    Readme,
    Package,
}

impl FromStr for CacheKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search" => Ok(CacheKind::Search),
            "readme" => Ok(CacheKind::Readme),
            "package" => Ok(CacheKind::Package),
            other => anyhow::bail!(
                "Unknown cache type: '{}'. Must be search, readme or package.",
                other
            ),
        }
    }
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Search => "search",
            CacheKind::Readme => "readme",
            CacheKind::Package => "package",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub search: i64,
    pub readme: i64,
    pub package: i64,
}

pub struct CacheTiers {
    pub queries: QueryCache,
    pub documents: DocumentCache,
    pub artifacts: ArtifactCache,
}

impl CacheTiers {
    /// Expects migrations to have run.
    pub async fn open(config: &Config, offload: Offload) -> anyhow::Result<Self> {
        Ok(Self {
            queries: QueryCache::open(config).await?,
            documents: DocumentCache::open(config).await?,
            artifacts: ArtifactCache::open(config, offload).await?,
        })
    }

    pub async fn stats(&self) -> MirageResult<CacheStats> {
        Ok(CacheStats {
            search: self.queries.count().await?,
            readme: self.documents.count().await?,
            package: self.artifacts.count().await?,
        })
    }

    /// Clear one tier, or all of them with `None`.
    pub async fn clear(&self, kind: Option<CacheKind>) -> MirageResult<u64> {
        let mut removed = 0;
        if matches!(kind, None | Some(CacheKind::Search)) {
            removed += self.queries.clear().await?;
        }
        if matches!(kind, None | Some(CacheKind::Readme)) {
            removed += self.documents.clear().await?;
        }
        if matches!(kind, None | Some(CacheKind::Package)) {
            removed += self.artifacts.clear().await?;
        }
        tracing::info!(
            tier = kind.map(|k| k.as_str()).unwrap_or("all"),
            removed,
            "cache cleared"
        );
        Ok(removed)
    }

    /// Whether a README and a bundle are cached for `name`.
    ///
    /// Cache errors read as "not cached".
    pub async fn availability(&self, name: &str) -> Availability {
        let (readme, package) = tokio::join!(
            self.documents.has_by_name(name),
            self.artifacts.has_by_name(name)
        );
        Availability {
            name: name.to_string(),
            readme_cached: readme.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "document tier unavailable");
                false
            }),
            package_cached: package.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "artifact tier unavailable");
                false
            }),
        }
    }

    pub async fn close(&self) {
        self.queries.close().await;
        self.documents.close().await;
        self.artifacts.close().await;
    }
}

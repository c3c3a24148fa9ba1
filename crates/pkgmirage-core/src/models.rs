//! Core data models used throughout pkgmirage.
//!
//! A [`PackageRecord`] is either *verified* (the name is in the existence
//! index and most fields are stand-ins until authoritative metadata is
//! fetched) or *fabricated* (the name is unknown and every field was
//! invented by the generative model). Both share one schema and are told
//! apart by `package_exists`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Version shown on a verified record before enrichment.
pub const PENDING_VERSION: &str = "N/A";

/// Description shown on a verified record before enrichment.
pub const PENDING_DESCRIPTION: &str =
    "This is a real package. Full details will be fetched from the package index.";

/// One search result, shaped like a package-index search entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default)]
    pub maintainer: Option<String>,
    #[serde(default)]
    pub maintainer_email: Option<String>,
    #[serde(default)]
    pub home_page: Option<String>,
    #[serde(default)]
    pub package_url: Option<String>,
    #[serde(default)]
    pub release_url: Option<String>,
    #[serde(default)]
    pub docs_url: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub bugtrack_url: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub classifiers: Vec<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub requires_python: Option<String>,
    #[serde(default)]
    pub project_urls: BTreeMap<String, String>,
    /// Membership in the existence index at check time.
    #[serde(default)]
    pub package_exists: bool,
    /// A generated or scraped README is in the document tier.
    #[serde(default)]
    pub readme_cached: bool,
    /// A generated bundle is in the artifact tier.
    #[serde(default)]
    pub package_cached: bool,
}

impl PackageRecord {
    /// Placeholder for a name confirmed to exist, pending enrichment.
    pub fn verified(name: &str, readme_cached: bool, package_cached: bool) -> Self {
        Self {
            name: name.to_string(),
            version: PENDING_VERSION.to_string(),
            description: Some(PENDING_DESCRIPTION.to_string()),
            summary: None,
            author: None,
            author_email: None,
            maintainer: None,
            maintainer_email: None,
            home_page: None,
            package_url: None,
            release_url: None,
            docs_url: None,
            download_url: None,
            bugtrack_url: None,
            keywords: None,
            license: None,
            classifiers: Vec::new(),
            platform: None,
            requires_python: None,
            project_urls: BTreeMap::new(),
            package_exists: true,
            readme_cached,
            package_cached,
        }
    }

    /// Still carries the stand-in fields of [`PackageRecord::verified`].
    pub fn is_pending(&self) -> bool {
        self.package_exists && self.version == PENDING_VERSION
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SearchInfo {
    pub query: String,
    pub count: usize,
}

/// Search response in package-index format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SearchResponse {
    #[serde(default)]
    pub info: SearchInfo,
    #[serde(default)]
    pub results: Vec<PackageRecord>,
}

impl SearchResponse {
    pub fn new(query: &str, results: Vec<PackageRecord>) -> Self {
        Self {
            info: SearchInfo {
                query: query.to_string(),
                count: results.len(),
            },
            results,
        }
    }

    /// Keep at most `limit` results. `info` is left as stored.
    pub fn truncated(mut self, limit: usize) -> Self {
        self.results.truncate(limit);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.name.as_str()).collect()
    }
}

/// Input metadata for drafting a README.
///
/// The document tier is keyed by [`ReadmeRequest::request_hash`], so two
/// requests differing in any field produce separate cache rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReadmeRequest {
    pub name: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub documentation_url: Option<String>,
    #[serde(default)]
    pub install_cmd: Option<String>,
    #[serde(default)]
    pub python_requires: Option<String>,
    #[serde(default)]
    pub features: Option<Vec<String>>,
    #[serde(default)]
    pub usage_snippets: Option<Vec<String>>,
    #[serde(default)]
    pub extras: Option<serde_json::Value>,
}

impl ReadmeRequest {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// SHA-256 of the request serialized with sorted keys.
    pub fn request_hash(&self) -> String {
        // serde_json::Map is a BTreeMap, so going through Value sorts keys
        // at every depth, including inside `extras`.
        let canonical = serde_json::to_value(self)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| self.name.clone());
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

/// One row of search history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub query: String,
    pub count: usize,
    pub created_at: DateTime<Utc>,
}

/// Package name with the time of its most recent cached README.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub package_name: String,
    pub latest: DateTime<Utc>,
}

/// Whether a README and a bundle are already cached for a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub name: String,
    pub readme_cached: bool,
    pub package_cached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verified_placeholder_is_pending() {
        let r = PackageRecord::verified("textual", true, false);
        assert!(r.package_exists);
        assert!(r.is_pending());
        assert!(r.readme_cached);
        assert!(!r.package_cached);
        assert_eq!(r.description.as_deref(), Some(PENDING_DESCRIPTION));
    }

    #[test]
    fn record_deserializes_with_defaults() {
        let r: PackageRecord =
            serde_json::from_str(r#"{"name":"fakepkg123","version":"0.2.0"}"#).unwrap();
        assert_eq!(r.name, "fakepkg123");
        assert!(!r.package_exists);
        assert!(r.classifiers.is_empty());
        assert!(r.project_urls.is_empty());
    }

    #[test]
    fn record_requires_version() {
        let r = serde_json::from_str::<PackageRecord>(r#"{"name":"x"}"#);
        assert!(r.is_err());
    }

    #[test]
    fn truncated_keeps_prefix() {
        let resp = SearchResponse::new(
            "q",
            vec![
                PackageRecord::verified("a", false, false),
                PackageRecord::verified("b", false, false),
                PackageRecord::verified("c", false, false),
            ],
        );
        let t = resp.truncated(2);
        assert_eq!(t.names(), vec!["a", "b"]);
    }

    #[test]
    fn request_hash_is_stable_and_field_sensitive() {
        let a = ReadmeRequest::named("rich");
        let b = ReadmeRequest::named("rich");
        assert_eq!(a.request_hash(), b.request_hash());
        assert_eq!(a.request_hash().len(), 64);

        let mut c = ReadmeRequest::named("rich");
        c.summary = Some("Rich text in the terminal".into());
        assert_ne!(a.request_hash(), c.request_hash());
    }

    #[test]
    fn request_hash_ignores_extras_key_order() {
        let mut a = ReadmeRequest::named("rich");
        a.extras = Some(serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap());
        let mut b = ReadmeRequest::named("rich");
        b.extras = Some(serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap());
        assert_eq!(a.request_hash(), b.request_hash());
    }
}

//! Result assembly: the entry point for turning a query into records.
//!
//! 1. Blank query: every cached result set, newest first.
//! 2. Query-tier hit: return it, truncated to `limit`.
//! 3. Generate candidates, split them against the existence index,
//!    synthesize metadata for the unknown ones.
//! 4. Re-walk the candidate order, emitting a verified placeholder, a
//!    fabricated record, or nothing for each name.
//! 5. Optionally enrich, then persist non-empty result sets.
//!
//! Cache failures are logged and the request continues uncached.

use std::sync::Arc;

use pkgmirage_core::existence::ExistenceCheck;
use pkgmirage_core::models::{PackageRecord, SearchResponse};

use crate::cache::CacheTiers;
use crate::enrich::Enricher;
use crate::generator::CandidateGenerator;
use crate::synth::MetadataSynthesizer;

pub struct Resolver {
    generator: CandidateGenerator,
    synthesizer: MetadataSynthesizer,
    existence: Arc<dyn ExistenceCheck>,
    caches: Arc<CacheTiers>,
}

impl Resolver {
    pub fn new(
        generator: CandidateGenerator,
        synthesizer: MetadataSynthesizer,
        existence: Arc<dyn ExistenceCheck>,
        caches: Arc<CacheTiers>,
    ) -> Self {
        Self {
            generator,
            synthesizer,
            existence,
            caches,
        }
    }

    pub async fn resolve(&self, query: &str, limit: usize) -> SearchResponse {
        self.resolve_with(query, limit, None).await
    }

    pub async fn resolve_with(
        &self,
        query: &str,
        limit: usize,
        enricher: Option<&Enricher>,
    ) -> SearchResponse {
        let query = query.trim();
        if query.is_empty() {
            return self.all_cached(limit).await;
        }

        match self.caches.queries.get(query).await {
            Ok(Some(hit)) => {
                tracing::info!(query, "query cache hit");
                return hit.truncated(limit);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "query cache unavailable, resolving uncached"),
        }

        let candidates = self.generator.generate(query, limit).await;
        if candidates.is_empty() {
            tracing::info!(query, "no candidates generated");
            return SearchResponse::new(query, Vec::new());
        }

        let (verified, unverified): (Vec<&String>, Vec<&String>) = candidates
            .iter()
            .partition(|name| self.existence.exists(name));
        tracing::info!(
            verified = verified.len(),
            fabricated = unverified.len(),
            "candidates classified"
        );

        let unverified: Vec<String> = unverified.into_iter().cloned().collect();
        let mut fabricated = self.synthesizer.synthesize(&unverified, query).await;

        let mut results = Vec::with_capacity(candidates.len());
        for name in &candidates {
            let record = if verified.contains(&name) {
                let avail = self.caches.availability(name).await;
                PackageRecord::verified(name, avail.readme_cached, avail.package_cached)
            } else if let Some(mut record) = fabricated.remove(name) {
                let avail = self.caches.availability(&record.name).await;
                record.readme_cached = avail.readme_cached;
                record.package_cached = avail.package_cached;
                record
            } else {
                tracing::debug!(name = %name, "no record produced, dropping candidate");
                continue;
            };
            results.push(record);
        }

        if let Some(enricher) = enricher {
            results = enricher.enrich(results, &self.caches.documents).await;
        }

        let response = SearchResponse::new(query, results);
        if response.results.is_empty() {
            return response;
        }
        if let Err(e) = self.caches.queries.put(query, &response).await {
            tracing::warn!(error = %e, "could not cache search results");
        }
        response
    }

    async fn all_cached(&self, limit: usize) -> SearchResponse {
        let all = match self.caches.queries.all().await {
            Ok(all) => all,
            Err(e) => {
                tracing::warn!(error = %e, "could not read cached searches");
                Vec::new()
            }
        };
        let results: Vec<PackageRecord> = all
            .into_iter()
            .flat_map(|r| r.results)
            .take(limit)
            .collect();
        SearchResponse::new("", results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::config::Config;
    use crate::migrate::run_migrations;
    use crate::offload::Offload;
    use crate::repair::RepairPipeline;
    use pkgmirage_core::testing::ScriptedCompleter;
    use std::collections::HashSet;
    use tempfile::TempDir;

    async fn resolver(
        tmp: &TempDir,
        model: Arc<ScriptedCompleter>,
        known: &[&str],
    ) -> (Resolver, Arc<CacheTiers>) {
        let config = Config::with_root(tmp.path());
        run_migrations(&config).await.unwrap();
        let caches = Arc::new(CacheTiers::open(&config, Offload::new(2)).await.unwrap());
        let existence: HashSet<String> = known.iter().map(|s| s.to_string()).collect();
        let resolver = Resolver::new(
            CandidateGenerator::new(model.clone(), 5),
            MetadataSynthesizer::new(
                model.clone(),
                RepairPipeline::new(model, AuditLog::disabled()),
                3,
            ),
            Arc::new(existence),
            caches.clone(),
        );
        (resolver, caches)
    }

    #[tokio::test]
    async fn mixes_verified_and_fabricated_in_generation_order() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedCompleter::new([
            "fakepkg123\ntextual\nnever-synthesized",
            r#"{"results": [{"name": "fakepkg123", "version": "0.3.0"}]}"#,
        ]));
        let (resolver, caches) = resolver(&tmp, model.clone(), &["textual"]).await;

        let resp = resolver.resolve("terminal ui", 3).await;
        assert_eq!(resp.names(), vec!["fakepkg123", "textual"]);
        assert!(!resp.results[0].package_exists);
        assert!(resp.results[1].package_exists);
        assert!(resp.results[1].is_pending());
        assert_eq!(resp.info.count, 2);
        assert_eq!(caches.queries.count().await.unwrap(), 1);
        caches.close().await;
    }

    #[tokio::test]
    async fn flags_reflect_cached_documents_and_bundles() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedCompleter::new(["rich\n"]));
        let (resolver, caches) = resolver(&tmp, model, &["rich"]).await;
        caches
            .documents
            .put(&pkgmirage_core::models::ReadmeRequest::named("rich"), "# rich")
            .await
            .unwrap();

        let resp = resolver.resolve("pretty output", 1).await;
        assert!(resp.results[0].readme_cached);
        assert!(!resp.results[0].package_cached);
        caches.close().await;
    }

    #[tokio::test]
    async fn empty_results_are_not_cached() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedCompleter::new(Vec::<String>::new()).then_fail("down"));
        let (resolver, caches) = resolver(&tmp, model, &[]).await;

        let resp = resolver.resolve("anything", 5).await;
        assert!(resp.results.is_empty());
        assert_eq!(caches.queries.count().await.unwrap(), 0);
        caches.close().await;
    }

    #[tokio::test]
    async fn blank_query_concatenates_cache() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedCompleter::new(Vec::<String>::new()));
        let (resolver, caches) = resolver(&tmp, model.clone(), &[]).await;
        caches
            .queries
            .put(
                "a",
                &SearchResponse::new("a", vec![PackageRecord::verified("one", false, false)]),
            )
            .await
            .unwrap();
        caches
            .queries
            .put(
                "b",
                &SearchResponse::new(
                    "b",
                    vec![
                        PackageRecord::verified("two", false, false),
                        PackageRecord::verified("three", false, false),
                    ],
                ),
            )
            .await
            .unwrap();

        let resp = resolver.resolve("   ", 2).await;
        assert_eq!(resp.results.len(), 2);
        assert_eq!(resp.info.query, "");
        assert_eq!(model.call_count(), 0);
        caches.close().await;
    }
}

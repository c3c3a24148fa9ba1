//! Fabricated metadata for names that are not in the existence index.
//!
//! Names are sent in small batches. Each batch response goes through the
//! [`RepairPipeline`]; a batch that still fails is skipped and its names get
//! no record. Returned records are keyed by their own `name` field, which
//! is not required to match a requested name.

use std::collections::HashMap;
use std::sync::Arc;

use pkgmirage_core::error::{MirageError, MirageResult};
use pkgmirage_core::llm::{Completer, METADATA_SYNTHESIS};
use pkgmirage_core::models::PackageRecord;
use serde_json::Value;

use crate::repair::RepairPipeline;

const SYSTEM_PROMPT: &str = "You are a helpful assistant that knows about Python packages. \
You will be given names of packages that DO NOT exist. \
Your task is to generate realistic-looking PyPI metadata for them. \
Return the data in the exact JSON format requested.";

pub struct MetadataSynthesizer {
    completer: Arc<dyn Completer>,
    repair: RepairPipeline,
    batch_size: usize,
}

impl MetadataSynthesizer {
    pub fn new(completer: Arc<dyn Completer>, repair: RepairPipeline, batch_size: usize) -> Self {
        Self {
            completer,
            repair,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn synthesize(&self, names: &[String], query: &str) -> HashMap<String, PackageRecord> {
        let mut out = HashMap::new();

        for batch in names.chunks(self.batch_size) {
            tracing::info!(batch = ?batch, "synthesizing metadata");
            match self.synthesize_batch(batch, query).await {
                Ok(records) => {
                    for record in records {
                        out.insert(record.name.clone(), record);
                    }
                }
                Err(e) => {
                    tracing::warn!(batch = ?batch, error = %e, "metadata batch skipped");
                }
            }
        }

        out
    }

    async fn synthesize_batch(&self, batch: &[String], query: &str) -> MirageResult<Vec<PackageRecord>> {
        let content = self
            .completer
            .complete_once(SYSTEM_PROMPT, &batch_prompt(batch, query), METADATA_SYNTHESIS)
            .await?;
        if content.trim().is_empty() {
            return Err(MirageError::Generation("empty metadata response".into()));
        }

        let repaired = self.repair.repair(&content).await?;
        Ok(records_from(repaired.value))
    }
}

/// Accepts `{"results": [...]}` or a bare array. Items that do not fit the
/// record schema are dropped one by one.
fn records_from(value: Value) -> Vec<PackageRecord> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<PackageRecord>(item) {
            Ok(mut record) => {
                record.package_exists = false;
                record.readme_cached = false;
                record.package_cached = false;
                Some(record)
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed metadata item");
                None
            }
        })
        .collect()
}

fn batch_prompt(batch: &[String], query: &str) -> String {
    let list = batch
        .iter()
        .map(|n| format!("- {}", n))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"
The following Python packages related to "{query}" do not exist.
Please generate realistic PyPI metadata for them:
{list}

Return the data in this exact JSON format, with one entry for each requested package:
{{
    "results": [
        {{
            "name": "package-name",
            "version": "1.0.0",
            "description": "Brief, plausible description of what the package might do.",
            "summary": "One-line summary",
            "author": "Generated Author",
            "author_email": "author@example.com",
            "home_page": "https://github.com/author/package-name",
            "package_url": "https://pypi.org/project/package-name/",
            "keywords": "keyword1, keyword2",
            "license": "MIT",
            "classifiers": [
                "Development Status :: 3 - Alpha",
                "Intended Audience :: Developers",
                "License :: OSI Approved :: MIT License",
                "Programming Language :: Python :: 3"
            ],
            "requires_python": ">=3.8",
            "project_urls": {{
                "Homepage": "https://github.com/author/package-name",
                "Repository": "https://github.com/author/package-name"
            }}
        }}
    ]
}}

Ensure the 'name' field in each JSON object exactly matches one of the requested package names.
"#
    )
}

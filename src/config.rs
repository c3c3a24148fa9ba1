use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl StorageConfig {
    /// Query, document and artifact tiers.
    pub fn cache_db_path(&self) -> PathBuf {
        self.root.join("cache.sqlite")
    }

    /// Existence snapshot. Its mtime is the refresh timestamp.
    pub fn index_db_path(&self) -> PathBuf {
        self.root.join("index.sqlite")
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_model() -> String {
    "anthropic/claude-3.5-sonnet".to_string()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_enrich_concurrency")]
    pub enrich_concurrency: usize,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            batch_size: default_batch_size(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            enrich_concurrency: default_enrich_concurrency(),
            worker_threads: default_worker_threads(),
        }
    }
}

impl SearchConfig {
    /// Clamp a requested size into `1..=max_limit`, defaulting when absent.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit)
    }
}

fn default_max_rounds() -> usize {
    5
}
fn default_batch_size() -> usize {
    3
}
fn default_limit() -> usize {
    20
}
fn default_max_limit() -> usize {
    100
}
fn default_enrich_concurrency() -> usize {
    10
}
fn default_worker_threads() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_source_url")]
    pub source_url: String,
    #[serde(default = "default_staleness_hours")]
    pub staleness_hours: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            source_url: default_source_url(),
            staleness_hours: default_staleness_hours(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_source_url() -> String {
    "https://pypi.org/simple/".to_string()
}
fn default_staleness_hours() -> u64 {
    24
}
fn default_fetch_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuditConfig {
    /// JSON-lines file for repair and model-call events. Unset: tracing only.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Defaults everywhere, rooted at `root`. Provider disabled.
    pub fn with_root(root: &Path) -> Self {
        Self {
            storage: StorageConfig {
                root: root.to_path_buf(),
            },
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            index: IndexConfig::default(),
            audit: AuditConfig::default(),
            server: ServerConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.search.max_rounds == 0 {
            anyhow::bail!("search.max_rounds must be >= 1");
        }
        if self.search.batch_size == 0 {
            anyhow::bail!("search.batch_size must be >= 1");
        }
        if self.search.enrich_concurrency == 0 {
            anyhow::bail!("search.enrich_concurrency must be >= 1");
        }
        if self.search.worker_threads == 0 {
            anyhow::bail!("search.worker_threads must be >= 1");
        }
        if self.search.default_limit == 0 || self.search.default_limit > self.search.max_limit {
            anyhow::bail!("search.default_limit must be in [1, search.max_limit]");
        }
        if self.index.staleness_hours == 0 {
            anyhow::bail!("index.staleness_hours must be >= 1");
        }

        match self.llm.provider.as_str() {
            "disabled" | "openai" => {}
            other => anyhow::bail!(
                "Unknown llm provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

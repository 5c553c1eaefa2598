use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR: &str = ".docrag";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub corpus: CorpusConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the LanceDB database (relative to .docrag/)
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Upgrade a legacy single-table layout when the store is opened
    #[serde(default = "default_true")]
    pub auto_migrate: bool,

    /// Drop the legacy table once a migration has been verified
    #[serde(default)]
    pub drop_legacy_after_migration: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            auto_migrate: true,
            drop_legacy_after_migration: false,
        }
    }
}

fn default_db_path() -> String {
    "index.lance".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Embedding dimension the store is created with
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Query embedding cache
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            cache: CacheConfig::default(),
        }
    }
}

fn default_dimension() -> usize {
    768
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_ttl_seconds(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_ttl_seconds() -> u64 {
    3600
}

fn default_max_entries() -> usize {
    1024
}

/// Search mode configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Vector-only semantic search
    Vector,
    /// BM25-only keyword search
    #[serde(alias = "bm25")]
    Keyword,
    /// Vector and keyword rankings merged with RRF
    Hybrid,
}

impl Default for SearchMode {
    fn default() -> Self {
        Self::Hybrid
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchMode::Vector => write!(f, "vector"),
            SearchMode::Keyword => write!(f, "keyword"),
            SearchMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vector" => Ok(Self::Vector),
            "keyword" | "bm25" => Ok(Self::Keyword),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown search mode: {}", other)),
        }
    }
}

/// Search configuration for hybrid retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Mode used when the caller does not pick one
    #[serde(default)]
    pub mode: SearchMode,

    /// RRF k constant (higher = smoother rank influence)
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,

    /// Candidates fetched per path in hybrid mode, as a multiple of top_k
    #[serde(default = "default_oversample_factor")]
    pub oversample_factor: usize,

    /// Upper bound on candidates fetched per path in hybrid mode
    #[serde(default = "default_oversample_cap")]
    pub oversample_cap: usize,

    /// Default number of results to return
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    /// Deadline for a single query embedding
    #[serde(default = "default_embedding_timeout_ms")]
    pub embedding_timeout_ms: u64,

    /// Deadline for a single store call
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::default(),
            rrf_k: default_rrf_k(),
            oversample_factor: default_oversample_factor(),
            oversample_cap: default_oversample_cap(),
            default_limit: default_search_limit(),
            embedding_timeout_ms: default_embedding_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl SearchConfig {
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Number of candidates each path contributes to fusion.
    pub fn candidate_count(&self, top_k: usize) -> usize {
        top_k
            .saturating_mul(self.oversample_factor.max(1))
            .min(self.oversample_cap)
            .max(top_k)
    }
}

fn default_rrf_k() -> f32 {
    60.0
}

fn default_oversample_factor() -> usize {
    3
}

fn default_oversample_cap() -> usize {
    100
}

fn default_search_limit() -> usize {
    10
}

fn default_embedding_timeout_ms() -> u64 {
    10_000
}

fn default_store_timeout_ms() -> u64 {
    30_000
}

/// Corpus cache bounds for the keyword index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Maximum number of chunks the keyword index will load
    #[serde(default)]
    pub max_documents: Option<usize>,

    /// Maximum number of tokens held in memory across the corpus
    #[serde(default)]
    pub max_tokens: Option<usize>,

    /// Deadline for a full corpus rebuild
    #[serde(default = "default_rebuild_timeout_ms")]
    pub rebuild_timeout_ms: u64,

    /// Fold simple English plurals ("cats" -> "cat") during tokenization
    #[serde(default = "default_true")]
    pub fold_plurals: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            max_documents: None,
            max_tokens: None,
            rebuild_timeout_ms: default_rebuild_timeout_ms(),
            fold_plurals: true,
        }
    }
}

impl CorpusConfig {
    pub fn rebuild_timeout(&self) -> Duration {
        Duration::from_millis(self.rebuild_timeout_ms)
    }
}

fn default_rebuild_timeout_ms() -> u64 {
    60_000
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Write logs to rolling files
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Also write logs to stderr
    #[serde(default)]
    pub stderr: bool,

    /// Log level for the file layer
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log directory (relative paths resolve against the project root)
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    /// Log file name prefix
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Rotation: hourly, daily, minutely or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stderr: false,
            level: default_log_level(),
            directory: default_log_directory(),
            file_prefix: default_file_prefix(),
            rotation: default_rotation(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> PathBuf {
    PathBuf::from(".docrag/logs")
}

fn default_file_prefix() -> String {
    "docrag.log".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Config {
    /// Load configuration from the .docrag directory
    pub fn load(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_DIR).join(CONFIG_FILE);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;

            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", config_path))
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to the .docrag directory
    pub fn save(&self, root: &Path) -> Result<()> {
        let config_dir = root.join(CONFIG_DIR);
        let config_path = config_dir.join(CONFIG_FILE);

        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory {:?}", config_dir))?;

        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config to {:?}", config_path))?;

        Ok(())
    }

    /// Get the path to the .docrag directory
    pub fn docrag_dir(root: &Path) -> PathBuf {
        root.join(CONFIG_DIR)
    }

    /// Get the path to the LanceDB database
    pub fn db_path(&self, root: &Path) -> PathBuf {
        Self::docrag_dir(root).join(&self.storage.db_path)
    }
}

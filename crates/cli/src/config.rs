use anyhow::Result;
use semfind_indexer::{PipelineConfig, ScanConfig};
use semfind_search::{ScorerConfig, SearchConfig};
use semfind_vector_store::ProviderKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Persisted application configuration (`~/.semfind/config.json`).
///
/// Unknown fields are tolerated and missing fields fall back to defaults,
/// so old config files keep working across upgrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the local inference server.
    pub embedding_endpoint: String,
    pub embedding_model: String,
    pub embedding_provider: ProviderKind,
    /// Must match the model; changing it requires a full re-index.
    pub embedding_dimension: usize,
    pub embed_timeout_secs: u64,

    pub watched_directories: Vec<String>,
    pub scan: ScanConfig,
    pub scorer: ScorerConfig,

    pub worker_count: Option<usize>,
    pub chunk_size_words: usize,
    pub max_context_tokens: usize,
    pub retry_attempts: u32,

    pub crossover_threshold: usize,
    pub overfetch_factor: usize,
    pub max_search_results: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let pipeline = PipelineConfig::default();
        let search = SearchConfig::default();
        Self {
            embedding_endpoint: "http://localhost:11434".to_string(),
            embedding_model: "embeddinggemma".to_string(),
            embedding_provider: ProviderKind::Http,
            embedding_dimension: 768,
            embed_timeout_secs: 60,
            watched_directories: Vec::new(),
            scan: ScanConfig::default(),
            scorer: ScorerConfig::default(),
            worker_count: None,
            chunk_size_words: pipeline.chunk_size_words,
            max_context_tokens: pipeline.max_context_tokens,
            retry_attempts: pipeline.retry_attempts,
            crossover_threshold: search.crossover_threshold,
            overfetch_factor: search.overfetch_factor,
            max_search_results: 100,
        }
    }
}

impl AppConfig {
    #[must_use]
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".semfind")
    }

    #[must_use]
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    #[must_use]
    pub fn data_dir() -> PathBuf {
        Self::config_dir().join("data")
    }

    pub async fn load_or_default() -> Result<Self> {
        Self::load_or_default_at(Self::config_file()).await
    }

    pub async fn load_or_default_at(config_file: PathBuf) -> Result<Self> {
        if config_file.exists() {
            let content = tokio::fs::read_to_string(&config_file).await?;
            let config: Self = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save_at(config_file).await?;
            Ok(config)
        }
    }

    pub async fn save(&self) -> Result<()> {
        self.save_at(Self::config_file()).await
    }

    pub async fn save_at(&self, config_file: PathBuf) -> Result<()> {
        if let Some(parent) = config_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&config_file, content).await?;
        Ok(())
    }

    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            worker_count: self.worker_count.unwrap_or(defaults.worker_count),
            chunk_size_words: self.chunk_size_words,
            max_context_tokens: self.max_context_tokens,
            retry_attempts: self.retry_attempts,
            retry_base_delay: defaults.retry_base_delay,
        }
    }

    #[must_use]
    pub fn search_config(&self) -> SearchConfig {
        let defaults = SearchConfig::default();
        SearchConfig {
            crossover_threshold: self.crossover_threshold,
            overfetch_factor: self.overfetch_factor,
            embed_timeout: Duration::from_secs(self.embed_timeout_secs),
            scorer: self.scorer.clone(),
            ..defaults
        }
    }
}

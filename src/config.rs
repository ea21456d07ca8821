use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::EmbedMode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub graph: GraphConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    /// Root directory scanned for notes.
    #[serde(default = "default_vault_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: default_vault_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_vault_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Location of the chunk index file.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("kb/index/embeddings.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1200
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embed_mode")]
    pub mode: EmbedMode,
    /// Provider model identifier; recorded in index headers. Only used for
    /// requests in external mode.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Base URL of the OpenAI-compatible embeddings API.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            mode: default_embed_mode(),
            model: default_model(),
            dimension: default_dimension(),
            endpoint: default_endpoint(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embed_mode() -> EmbedMode {
    EmbedMode::Local
}
fn default_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dimension() -> usize {
    256
}
fn default_endpoint() -> String {
    "https://api.openai.com".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    /// Minimum cosine similarity for an edge between two concepts.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Concepts occurring fewer times than this are dropped, not stored.
    #[serde(default = "default_min_concept_frequency")]
    pub min_concept_frequency: u64,
    #[serde(default = "default_concepts_path")]
    pub concepts_path: PathBuf,
    #[serde(default = "default_concept_embeddings_path")]
    pub concept_embeddings_path: PathBuf,
    #[serde(default = "default_clusters_path")]
    pub clusters_path: PathBuf,
    #[serde(default = "default_graph_json_path")]
    pub graph_json_path: PathBuf,
    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            min_concept_frequency: default_min_concept_frequency(),
            concepts_path: default_concepts_path(),
            concept_embeddings_path: default_concept_embeddings_path(),
            clusters_path: default_clusters_path(),
            graph_json_path: default_graph_json_path(),
            report_path: default_report_path(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.7
}
fn default_min_concept_frequency() -> u64 {
    2
}
fn default_concepts_path() -> PathBuf {
    PathBuf::from("kb/graph/concepts.json")
}
fn default_concept_embeddings_path() -> PathBuf {
    PathBuf::from("kb/graph/concept-embeddings.json")
}
fn default_clusters_path() -> PathBuf {
    PathBuf::from("kb/graph/concept-clusters.json")
}
fn default_graph_json_path() -> PathBuf {
    PathBuf::from("kb/graph/graph.json")
}
fn default_report_path() -> PathBuf {
    PathBuf::from("kb/graph/clusters.md")
}

/// Load configuration from a TOML file, then apply recognized environment
/// overrides and validate.
///
/// A missing file is not an error: defaults apply, so an environment-only
/// setup works without a config file on disk. Overrides are resolved once
/// here; nothing else in the crate reads the environment for settings.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config)?;
    validate(&config)?;
    Ok(config)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault: VaultConfig::default(),
            index: IndexConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            graph: GraphConfig::default(),
        }
    }
}

/// Recognized environment overrides.
fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Ok(mode) = std::env::var("EMBED_MODE") {
        config.embedding.mode = match mode.to_lowercase().as_str() {
            "local" => EmbedMode::Local,
            "external" => EmbedMode::External,
            other => anyhow::bail!("EMBED_MODE must be local or external, got '{}'", other),
        };
    }
    if let Ok(dim) = std::env::var("EMBED_DIMENSION") {
        config.embedding.dimension = dim
            .parse()
            .with_context(|| format!("EMBED_DIMENSION is not an integer: '{}'", dim))?;
    }
    if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
        config.embedding.model = model;
    }
    if let Ok(threshold) = std::env::var("SIMILARITY_THRESHOLD") {
        config.graph.similarity_threshold = threshold
            .parse()
            .with_context(|| format!("SIMILARITY_THRESHOLD is not a number: '{}'", threshold))?;
    }
    if let Ok(size) = std::env::var("CHUNK_SIZE") {
        config.chunking.size = size
            .parse()
            .with_context(|| format!("CHUNK_SIZE is not an integer: '{}'", size))?;
    }
    if let Ok(overlap) = std::env::var("CHUNK_OVERLAP") {
        config.chunking.overlap = overlap
            .parse()
            .with_context(|| format!("CHUNK_OVERLAP is not an integer: '{}'", overlap))?;
    }
    if let Ok(freq) = std::env::var("MIN_CONCEPT_FREQUENCY") {
        config.graph.min_concept_frequency = freq
            .parse()
            .with_context(|| format!("MIN_CONCEPT_FREQUENCY is not an integer: '{}'", freq))?;
    }
    if let Ok(path) = std::env::var("INDEX_PATH") {
        config.index.path = PathBuf::from(path);
    }
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.size == 0 {
        anyhow::bail!("chunking.size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.size {
        anyhow::bail!(
            "chunking.overlap ({}) must be smaller than chunking.size ({})",
            config.chunking.overlap,
            config.chunking.size
        );
    }
    if config.embedding.dimension == 0 {
        anyhow::bail!("embedding.dimension must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if !(-1.0..=1.0).contains(&config.graph.similarity_threshold) {
        anyhow::bail!("graph.similarity_threshold must be in [-1.0, 1.0]");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.embedding.mode, EmbedMode::Local);
        assert_eq!(config.embedding.dimension, 256);
        assert_eq!(config.chunking.size, 1200);
        assert_eq!(config.chunking.overlap, 200);
        assert!((config.graph.similarity_threshold - 0.7).abs() < 1e-6);
        assert_eq!(config.graph.min_concept_frequency, 2);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
            [embedding]
            mode = "external"
            dimension = 512

            [graph]
            similarity_threshold = 0.8
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.embedding.mode, EmbedMode::External);
        assert_eq!(config.embedding.dimension, 512);
        assert!((config.graph.similarity_threshold - 0.8).abs() < 1e-6);
        // Untouched sections fall back to defaults.
        assert_eq!(config.chunking.size, 1200);
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut config = Config::default();
        config.chunking.size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_overlap_not_below_size() {
        let mut config = Config::default();
        config.chunking.size = 100;
        config.chunking.overlap = 100;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.graph.similarity_threshold = 1.5;
        assert!(validate(&config).is_err());
    }
}

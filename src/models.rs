//! Core data models used throughout Cortex KB.
//!
//! These types represent the notes, chunks, concepts, and search results that
//! flow through the indexing, retrieval, and clustering pipeline, plus the
//! transport-facing query contract.

use serde::{Deserialize, Serialize};

/// Embedding strategy recorded in the index header and selected in config.
///
/// Both modes produce vectors of the configured dimension so downstream
/// code never needs to know which one was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedMode {
    /// Deterministic hash embedding computed locally. No network calls.
    Local,
    /// Remote embedding provider (OpenAI-compatible HTTP API).
    External,
}

impl std::fmt::Display for EmbedMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedMode::Local => write!(f, "local"),
            EmbedMode::External => write!(f, "external"),
        }
    }
}

/// A raw note read from the vault before chunking.
#[derive(Debug, Clone)]
pub struct Note {
    /// Vault-relative path, used as the chunk `source` field.
    pub path: String,
    pub content: String,
}

/// An embedded text window from one source note, as persisted in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Monotonically assigned across the whole index; never reused.
    pub id: u64,
    /// Vault-relative path of the owning note.
    pub source: String,
    /// 0-based position within the source; contiguous per source.
    pub chunk_index: u32,
    pub text: String,
    /// Length equals the index header's `embed_dim` for every chunk.
    pub embedding: Vec<f32>,
}

/// A higher-level semantic unit extracted from notes (tag, link, heading,
/// or frontmatter value). Many-to-many with source notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    /// Deterministic slug derived from the label; stable across runs.
    pub id: String,
    pub label: String,
    /// Provenance kinds, sorted (e.g. `heading`, `link`, `tag`).
    pub types: Vec<String>,
    /// Paths of notes where the concept occurs, sorted.
    pub source_notes: Vec<String>,
    /// Total occurrence count across the vault.
    pub frequency: u64,
    /// Present only after the embedding stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// A similarity relation between two concepts, emitted during clustering.
///
/// Undirected; endpoints are ordered so `source < target` lexicographically
/// and each unordered pair appears at most once. Never persisted on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub source: String,
    pub target: String,
    /// Cosine similarity in `[-1, 1]`.
    pub weight: f32,
}

/// A connected component over concepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// `cluster-<rank>` after size-descending sort; stable within one run.
    pub id: String,
    pub member_ids: Vec<String>,
    pub size: usize,
    /// Member with the highest frequency (ties: smallest id).
    pub core_concept_id: String,
    pub total_frequency: u64,
}

/// A ranked retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: u64,
    pub source: String,
    pub text: String,
    /// Cosine similarity against the query embedding.
    pub score: f32,
}

/// Request shape consumed by external tool-calling transports.
///
/// The engine itself has no network awareness; this is the only contract a
/// transport layer needs to honor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(rename = "topK", default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

/// Response shape paired with [`SearchRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
}

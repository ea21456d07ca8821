//! Durable chunk index: a single JSON file with a flat header and a `data`
//! array of embedded chunks.
//!
//! Loading tolerates the two on-disk layouts that shipped over time (the
//! current flat-header form and a legacy form with a nested `header`
//! object) and migrates legacy defaults explicitly. Persisting always
//! writes the current layout, via write-to-temp-then-rename so a crashed
//! run never leaves a partial index behind.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::models::{Chunk, EmbedMode};

/// Index header metadata; serialized flat at the top level of the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHeader {
    /// Embedding model identifier (e.g. `text-embedding-3-small`, `hash-256`).
    pub model: String,
    #[serde(default = "default_embed_mode")]
    pub embed_mode: EmbedMode,
    /// Vector dimension shared by every chunk in the file. Zero means
    /// "unknown" and is inferred from the data on load.
    #[serde(default)]
    pub embed_dim: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Distinct source documents.
    #[serde(default)]
    pub files: u64,
    /// Total chunk count; recomputed on every persist.
    #[serde(default)]
    pub chunks: u64,
}

fn default_embed_mode() -> EmbedMode {
    EmbedMode::Local
}

/// The in-memory index: header plus chunks in creation order.
#[derive(Debug, Clone, Serialize)]
pub struct Index {
    #[serde(flatten)]
    pub header: IndexHeader,
    pub data: Vec<Chunk>,
    /// High-water mark for id assignment. Tracked separately from the data
    /// so ids of superseded chunks are never handed out again.
    #[serde(skip)]
    next_id: u64,
}

/// A chunk awaiting id assignment by [`Index::append_chunks`].
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub source: String,
    pub chunk_index: u32,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl Index {
    /// An empty index with a synthesized header.
    pub fn empty(model: String, embed_mode: EmbedMode, embed_dim: usize) -> Self {
        let now = Utc::now();
        Self {
            header: IndexHeader {
                model,
                embed_mode,
                embed_dim,
                created_at: now,
                updated_at: Some(now),
                files: 0,
                chunks: 0,
            },
            data: Vec::new(),
            next_id: 0,
        }
    }

    /// Append chunks, assigning each the next unused id in input order.
    ///
    /// Ids start at 0 for an empty index and are never reused, even
    /// after chunks are removed, across any number of calls in one
    /// process lifetime.
    pub fn append_chunks(&mut self, new_chunks: Vec<NewChunk>) {
        for nc in new_chunks {
            let id = self.next_id;
            self.next_id += 1;
            self.data.push(Chunk {
                id,
                source: nc.source,
                chunk_index: nc.chunk_index,
                text: nc.text,
                embedding: nc.embedding,
            });
        }
    }

    /// Drop all chunks belonging to `source`. Used when a changed document
    /// supersedes its previous chunks; replacement is always wholesale.
    pub fn remove_source(&mut self, source: &str) {
        self.data.retain(|c| c.source != source);
    }

    /// Distinct source documents currently in the index.
    pub fn source_count(&self) -> u64 {
        self.data
            .iter()
            .map(|c| c.source.as_str())
            .collect::<HashSet<_>>()
            .len() as u64
    }
}

/// Current on-disk layout: flat header fields alongside `data`.
#[derive(Deserialize)]
struct CurrentIndexFile {
    #[serde(flatten)]
    header: IndexHeader,
    data: Vec<Chunk>,
}

/// Legacy on-disk layout with a nested `header` object.
#[derive(Deserialize)]
struct LegacyIndexFile {
    header: IndexHeader,
    data: Vec<Chunk>,
}

/// Load the index from `path`.
///
/// A missing file is not an error: it yields an empty index with a
/// synthesized header so first runs and fresh checkouts just work.
/// Malformed content is an error: a corrupt index must never be silently
/// replaced.
pub fn load_index(path: &Path) -> Result<Index> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Index::empty("unknown".to_string(), EmbedMode::Local, 0));
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read index: {}", path.display()))
        }
    };

    // Try the current layout first, then the legacy nested-header layout.
    let (mut header, data) = match serde_json::from_str::<CurrentIndexFile>(&raw) {
        Ok(file) => (file.header, file.data),
        Err(current_err) => match serde_json::from_str::<LegacyIndexFile>(&raw) {
            Ok(file) => (file.header, file.data),
            Err(_) => {
                return Err(current_err)
                    .with_context(|| format!("Malformed index file: {}", path.display()))
            }
        },
    };

    // Migration defaults for older files.
    if header.embed_dim == 0 {
        header.embed_dim = data.first().map(|c| c.embedding.len()).unwrap_or(0);
    }
    if header.updated_at.is_none() {
        header.updated_at = Some(header.created_at);
    }

    let next_id = data.iter().map(|c| c.id + 1).max().unwrap_or(0);

    Ok(Index {
        header,
        data,
        next_id,
    })
}

/// Persist the index atomically (write to a temp file, then rename).
///
/// Refreshes `updated_at` and the `files`/`chunks` counts before writing.
pub fn persist_index(index: &mut Index, path: &Path) -> Result<()> {
    index.header.updated_at = Some(Utc::now());
    index.header.chunks = index.data.len() as u64;
    index.header.files = index.source_count();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create index dir: {}", parent.display()))?;
        }
    }

    let json = serde_json::to_string(&index)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &json)
        .with_context(|| format!("Failed to write index: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace index: {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_chunk(source: &str, chunk_index: u32, text: &str) -> NewChunk {
        NewChunk {
            source: source.to_string(),
            chunk_index,
            text: text.to_string(),
            embedding: vec![0.5, 0.5],
        }
    }

    #[test]
    fn test_missing_file_yields_empty_index() {
        let tmp = TempDir::new().unwrap();
        let index = load_index(&tmp.path().join("nope.json")).unwrap();
        assert!(index.data.is_empty());
        assert_eq!(index.header.chunks, 0);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_index(&path).is_err());
    }

    #[test]
    fn test_append_assigns_sequential_ids() {
        let mut index = Index::empty("hash-2".into(), EmbedMode::Local, 2);
        index.append_chunks(vec![
            new_chunk("a.md", 0, "one"),
            new_chunk("a.md", 1, "two"),
            new_chunk("b.md", 0, "three"),
        ]);
        let ids: Vec<u64> = index.data.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(index.source_count(), 2);
    }

    #[test]
    fn test_ids_never_reused_after_removal() {
        let mut index = Index::empty("hash-2".into(), EmbedMode::Local, 2);
        index.append_chunks(vec![
            new_chunk("a.md", 0, "one"),
            new_chunk("b.md", 0, "two"),
        ]);
        index.remove_source("b.md");
        index.append_chunks(vec![new_chunk("b.md", 0, "two again")]);

        // Chunk id 1 was handed out once; the replacement gets a fresh id.
        let ids: Vec<u64> = index.data.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn test_persist_then_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kb").join("index.json");

        let mut index = Index::empty("hash-2".into(), EmbedMode::Local, 2);
        index.append_chunks(vec![
            new_chunk("a.md", 0, "alpha"),
            new_chunk("a.md", 1, "beta"),
        ]);
        persist_index(&mut index, &path).unwrap();

        let loaded = load_index(&path).unwrap();
        assert_eq!(loaded.data.len(), 2);
        assert_eq!(loaded.header.chunks, 2);
        assert_eq!(loaded.header.files, 1);
        assert_eq!(loaded.header.embed_dim, 2);
        assert_eq!(loaded.header.embed_mode, EmbedMode::Local);
        assert_eq!(loaded.data[1].text, "beta");

        // No stray temp file left behind.
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_load_continues_id_sequence() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");

        let mut index = Index::empty("hash-2".into(), EmbedMode::Local, 2);
        index.append_chunks(vec![new_chunk("a.md", 0, "alpha")]);
        persist_index(&mut index, &path).unwrap();

        let mut reloaded = load_index(&path).unwrap();
        reloaded.append_chunks(vec![new_chunk("b.md", 0, "beta")]);
        assert_eq!(reloaded.data[1].id, 1);
    }

    #[test]
    fn test_legacy_nested_header_layout() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("legacy.json");
        let legacy = serde_json::json!({
            "header": {
                "model": "text-embedding-3-small",
                "created_at": "2024-03-01T12:00:00Z"
            },
            "data": [
                { "id": 0, "source": "a.md", "chunk_index": 0,
                  "text": "hello", "embedding": [1.0, 0.0, 0.0] }
            ]
        });
        std::fs::write(&path, serde_json::to_string(&legacy).unwrap()).unwrap();

        let index = load_index(&path).unwrap();
        assert_eq!(index.header.model, "text-embedding-3-small");
        // Migrated defaults: dimension inferred, updated_at backfilled.
        assert_eq!(index.header.embed_dim, 3);
        assert_eq!(index.header.updated_at, Some(index.header.created_at));
        assert_eq!(index.data.len(), 1);
    }
}

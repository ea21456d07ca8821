//! Content-hash differencing for incremental re-indexing.
//!
//! Decides which incoming notes actually need (re-)embedding by comparing a
//! SHA-256 hash of each note's full content against a per-source hash
//! reconstructed from the chunk texts already stored in the index. Matching
//! hashes mean the note is unchanged and its chunks are kept as-is.
//!
//! The stored-side hash is an approximation: the document is rebuilt from
//! its chunk windows (dropping each subsequent window's overlap prefix)
//! rather than kept as a separately stored digest. The reconstruction is
//! exact only while the chunking parameters match the ones that produced
//! the stored chunks; see DESIGN.md for the trade-off.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::models::Note;
use crate::store::Index;

/// Partition of an incoming note batch.
#[derive(Debug, Default)]
pub struct DiffOutcome {
    /// Notes that are new or changed and need (re-)embedding.
    pub to_embed: Vec<Note>,
    /// Notes whose stored chunks are still current.
    pub skipped: Vec<Note>,
    /// Per-item failures; these never abort the batch.
    pub errors: Vec<DiffError>,
}

#[derive(Debug, Clone)]
pub struct DiffError {
    pub path: String,
    pub reason: String,
}

/// SHA-256 hex digest of a note's full content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Per-source hash over the document text reconstructed from stored chunks.
///
/// Chunk 0 contributes fully; every later chunk contributes everything past
/// its first `overlap` characters, undoing the chunker's window overlap.
fn stored_source_hashes(index: &Index, overlap: usize) -> HashMap<String, String> {
    let mut per_source: HashMap<String, Vec<(u32, &str)>> = HashMap::new();
    for chunk in &index.data {
        per_source
            .entry(chunk.source.clone())
            .or_default()
            .push((chunk.chunk_index, &chunk.text));
    }

    let mut hashes = HashMap::new();
    for (source, mut chunks) in per_source {
        chunks.sort_by_key(|(idx, _)| *idx);
        let mut hasher = Sha256::new();
        for (idx, text) in chunks {
            if idx == 0 {
                hasher.update(text.as_bytes());
            } else {
                let tail: String = text.chars().skip(overlap).collect();
                hasher.update(tail.as_bytes());
            }
        }
        hashes.insert(source, format!("{:x}", hasher.finalize()));
    }
    hashes
}

/// Diff incoming notes against the index.
///
/// `overlap` must be the chunk overlap the index was built with. A note
/// with an empty path or empty content is recorded as an error, not
/// silently skipped; everything else lands in `to_embed` or `skipped`.
pub fn diff_notes(notes: Vec<Note>, index: &Index, overlap: usize) -> DiffOutcome {
    let existing = stored_source_hashes(index, overlap);
    let mut outcome = DiffOutcome::default();

    for note in notes {
        if note.path.is_empty() || note.content.is_empty() {
            outcome.errors.push(DiffError {
                path: if note.path.is_empty() {
                    "(unknown)".to_string()
                } else {
                    note.path.clone()
                },
                reason: "missing path or content".to_string(),
            });
            continue;
        }

        let hash = content_hash(&note.content);
        match existing.get(&note.path) {
            Some(prev) if *prev == hash => outcome.skipped.push(note),
            _ => outcome.to_embed.push(note),
        }
    }

    outcome
}

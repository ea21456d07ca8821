//! Concept extraction from vault notes.
//!
//! A concept is a higher-level semantic unit than a chunk: a tag, wikilink
//! target, frontmatter value, or top-level heading that recurs across
//! notes. Concepts are recomputed from scratch on every extraction pass;
//! only the serialized file carries them between runs.
//!
//! Concept ids are deterministic slugs of their labels so re-runs over the
//! same vault produce identical ids.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::Config;
use crate::embedding::{fnv1a, Embedder};
use crate::models::{Concept, Note};
use crate::vault;

/// Serialized concepts file: header plus concepts sorted by frequency
/// descending, then id ascending.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptsFile {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub total_concepts: usize,
    pub min_frequency: u64,
    pub concepts: Vec<Concept>,
}

/// Concepts file shape plus per-node embeddings and embedding metadata.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptEmbeddingsFile {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub embedding_model: String,
    pub dimension: usize,
    pub nodes: Vec<Concept>,
}

/// One raw concept occurrence found in a note.
///
/// The id is derived from `id_text` (the canonical form, e.g. a wikilink
/// target) while `label` keeps the human-readable form (e.g. the link's
/// display text).
struct Occurrence {
    id_text: String,
    label: String,
    kind: &'static str,
}

impl Occurrence {
    fn new(label: impl Into<String>, kind: &'static str) -> Self {
        let label = label.into();
        Self {
            id_text: label.clone(),
            label,
            kind,
        }
    }
}

/// Extracts concept occurrences from markdown notes.
///
/// Compiled patterns live here so extraction over a whole vault reuses
/// them; there is no global regex state.
pub struct ConceptExtractor {
    min_frequency: u64,
    inline_tag: Regex,
    wikilink: Regex,
    heading: Regex,
}

impl ConceptExtractor {
    pub fn new(min_frequency: u64) -> Self {
        Self {
            min_frequency,
            // A tag starts a word: "#rust", "#area/health". Heading markers
            // never match because '#' there is followed by whitespace.
            inline_tag: Regex::new(r"(^|\s)#([A-Za-z][A-Za-z0-9_/-]*)").unwrap(),
            // [[Target]], [[Target|Display]], [[Target#Section]]
            wikilink: Regex::new(r"\[\[([^\[\]|#]+)(?:#[^\[\]|]*)?(?:\|([^\[\]]+))?\]\]").unwrap(),
            // H1 and H2 only.
            heading: Regex::new(r"(?m)^#{1,2}\s+(.+)$").unwrap(),
        }
    }

    /// Extract, aggregate, and filter concepts across all notes.
    ///
    /// Concepts below the frequency threshold are dropped entirely, not
    /// stored at zero. Output is sorted by frequency descending, then id.
    pub fn extract(&self, notes: &[Note]) -> Vec<Concept> {
        struct Builder {
            label: String,
            types: BTreeSet<String>,
            source_notes: BTreeSet<String>,
            frequency: u64,
        }

        let mut concepts: BTreeMap<String, Builder> = BTreeMap::new();

        let mut add = |id: String, label: &str, kind: &str, source: &str| {
            let entry = concepts.entry(id.clone()).or_insert_with(|| Builder {
                label: label.to_string(),
                types: BTreeSet::new(),
                source_notes: BTreeSet::new(),
                frequency: 0,
            });
            entry.types.insert(kind.to_string());
            entry.source_notes.insert(source.to_string());
            entry.frequency += 1;
        };

        for note in notes {
            for occ in self.scan_note(&note.content) {
                if let Some(id) = slugify(&occ.id_text) {
                    add(id, &occ.label, occ.kind, &note.path);
                }
            }
        }

        let mut result: Vec<Concept> = concepts
            .into_iter()
            .filter(|(_, b)| b.frequency >= self.min_frequency)
            .map(|(id, b)| Concept {
                id,
                label: b.label,
                types: b.types.into_iter().collect(),
                source_notes: b.source_notes.into_iter().collect(),
                frequency: b.frequency,
                embedding: None,
            })
            .collect();

        result.sort_by(|a, b| b.frequency.cmp(&a.frequency).then(a.id.cmp(&b.id)));
        result
    }

    fn scan_note(&self, content: &str) -> Vec<Occurrence> {
        let mut occurrences = Vec::new();

        let (frontmatter, body) = split_frontmatter(content);

        if let Some(fm) = frontmatter {
            occurrences.extend(scan_frontmatter(fm));
        }

        for cap in self.inline_tag.captures_iter(body) {
            occurrences.push(Occurrence::new(&cap[2], "tag"));
        }

        for cap in self.wikilink.captures_iter(body) {
            let target = cap[1].trim().to_string();
            let label = cap
                .get(2)
                .map(|d| d.as_str().trim().to_string())
                .unwrap_or_else(|| target.clone());
            occurrences.push(Occurrence {
                id_text: target,
                label,
                kind: "link",
            });
        }

        for cap in self.heading.captures_iter(body) {
            occurrences.push(Occurrence::new(cap[1].trim(), "heading"));
        }

        occurrences
    }
}

/// Split a note into its YAML frontmatter block (if any) and body.
fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content.strip_prefix("---") else {
        return (None, content);
    };
    let Some(rest) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) else {
        return (None, content);
    };
    match rest.find("\n---") {
        Some(end) => {
            let body_start = rest[end + 1..]
                .find('\n')
                .map(|i| end + 1 + i + 1)
                .unwrap_or(rest.len());
            (Some(&rest[..end]), &rest[body_start..])
        }
        None => (None, content),
    }
}

/// Pull tags plus `category`/`type`/`topic` values out of a frontmatter
/// block. Minimal line-oriented parsing: inline arrays, comma lists, and
/// `- item` block lists under `tags:`.
fn scan_frontmatter(fm: &str) -> Vec<Occurrence> {
    let mut occurrences = Vec::new();
    let mut in_tags_block = false;

    for line in fm.lines() {
        let trimmed = line.trim();

        if in_tags_block {
            if let Some(item) = trimmed.strip_prefix("- ") {
                occurrences.push(Occurrence::new(unquote(item), "frontmatter-tag"));
                continue;
            }
            in_tags_block = false;
        }

        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "tags" => {
                if value.is_empty() {
                    in_tags_block = true;
                } else {
                    let list = value.trim_start_matches('[').trim_end_matches(']');
                    for item in list.split(',') {
                        let item = unquote(item.trim());
                        if !item.is_empty() {
                            occurrences.push(Occurrence::new(item, "frontmatter-tag"));
                        }
                    }
                }
            }
            "category" | "type" | "topic" => {
                let item = unquote(value);
                if !item.is_empty() {
                    occurrences.push(Occurrence::new(item, "frontmatter"));
                }
            }
            _ => {}
        }
    }

    occurrences
}

fn unquote(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'')
}

/// Deterministic slug id for a concept label.
///
/// Lowercases, strips a leading `#` and a trailing file extension, maps
/// runs of non-alphanumeric characters to `-`. Labels that slug down to
/// fewer than two characters get a stable hash-derived id instead; `None`
/// only for entirely empty input.
pub fn slugify(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut base = trimmed.trim_start_matches('#').to_lowercase();
    for ext in [".md", ".txt", ".json", ".yml", ".yaml"] {
        if let Some(stripped) = base.strip_suffix(ext) {
            base = stripped.to_string();
            break;
        }
    }

    let mut slug = String::with_capacity(base.len());
    let mut prev_dash = false;
    for c in base.chars() {
        if c.is_alphanumeric() {
            slug.push(c);
            prev_dash = false;
        } else if !prev_dash && !slug.is_empty() {
            slug.push('-');
            prev_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();

    if slug.chars().count() < 2 {
        return Some(format!("concept-{:08x}", fnv1a(trimmed)));
    }
    Some(slug)
}

/// Deterministic text representation embedded for a concept.
///
/// This defines exactly what gets embedded; changing it changes every
/// concept vector, so keep it stable.
pub fn concept_text(concept: &Concept) -> String {
    let mut notes_preview = concept
        .source_notes
        .iter()
        .take(5)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if concept.source_notes.len() > 5 {
        notes_preview.push_str(", ...");
    }

    format!(
        "{}\nTypes: {}\nFrequency: {}\nSource notes: {}",
        concept.label,
        concept.types.join(", "),
        concept.frequency,
        notes_preview
    )
}

// ============ File I/O ============

pub fn read_concepts_file(path: &Path) -> Result<ConceptsFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read concepts file: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Malformed concepts file: {}", path.display()))
}

pub fn read_concept_embeddings_file(path: &Path) -> Result<ConceptEmbeddingsFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read concept embeddings: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Malformed concept embeddings file: {}", path.display()))
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("Failed to write {}", path.display()))
}

// ============ Commands ============

/// Extract concepts from the vault and write the concepts file.
pub fn run_extract(config: &Config) -> Result<()> {
    let notes = vault::scan_vault(&config.vault)?;
    let extractor = ConceptExtractor::new(config.graph.min_concept_frequency);
    let concepts = extractor.extract(&notes);

    let file = ConceptsFile {
        version: "1.0".to_string(),
        generated_at: Utc::now(),
        total_concepts: concepts.len(),
        min_frequency: config.graph.min_concept_frequency,
        concepts,
    };
    write_json(&config.graph.concepts_path, &file)?;

    println!("concepts extract");
    println!("  notes scanned: {}", notes.len());
    println!("  concepts kept: {}", file.total_concepts);
    println!("  min frequency: {}", file.min_frequency);
    println!("  wrote: {}", config.graph.concepts_path.display());
    println!("ok");
    Ok(())
}

/// Embed every extracted concept and write the concept-embeddings file.
pub async fn run_embed_concepts(config: &Config) -> Result<()> {
    let concepts_file = read_concepts_file(&config.graph.concepts_path)?;
    if concepts_file.concepts.is_empty() {
        anyhow::bail!(
            "No concepts in {} — run `ckb concepts extract` first",
            config.graph.concepts_path.display()
        );
    }

    let embedder = Embedder::from_config(&config.embedding);
    let texts: Vec<String> = concepts_file.concepts.iter().map(concept_text).collect();

    let mut nodes = concepts_file.concepts;
    let mut embedded = 0usize;
    for (batch_idx, batch) in texts.chunks(config.embedding.batch_size).enumerate() {
        let vectors = embedder.embed_batch(batch).await?;
        for (offset, vector) in vectors.into_iter().enumerate() {
            nodes[batch_idx * config.embedding.batch_size + offset].embedding = Some(vector);
            embedded += 1;
        }
    }

    let file = ConceptEmbeddingsFile {
        version: "1.0".to_string(),
        generated_at: Utc::now(),
        embedding_model: embedder.model_name(),
        dimension: embedder.dims(),
        nodes,
    };
    write_json(&config.graph.concept_embeddings_path, &file)?;

    println!("concepts embed");
    println!("  concepts embedded: {}", embedded);
    println!("  model: {} (dim {})", file.embedding_model, file.dimension);
    println!("  wrote: {}", config.graph.concept_embeddings_path.display());
    println!("ok");
    Ok(())
}

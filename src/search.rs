//! Top-K retrieval over the chunk index.
//!
//! The query is embedded with the same configuration the index was built
//! with, scored against every stored chunk by cosine similarity, and the
//! best `top_k` hits are returned in deterministic order.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding::{cosine_similarity, Embedder};
use crate::models::{SearchHit, SearchResponse};
use crate::store::{load_index, Index};

/// Score every chunk against the query vector and return the top `top_k`
/// hits, sorted by score descending with ties broken by chunk id ascending.
///
/// A dimension mismatch between the query and any stored embedding is a
/// fatal configuration error, never a silent truncation.
pub fn rank_chunks(query_vec: &[f32], index: &Index, top_k: usize) -> Result<Vec<SearchHit>> {
    if index.header.embed_dim != 0 && query_vec.len() != index.header.embed_dim {
        bail!(
            "Query embedding dimension {} does not match index dimension {}",
            query_vec.len(),
            index.header.embed_dim
        );
    }

    let mut hits: Vec<SearchHit> = Vec::with_capacity(index.data.len());
    for chunk in &index.data {
        if chunk.embedding.len() != query_vec.len() {
            bail!(
                "Chunk {} has embedding dimension {} (expected {})",
                chunk.id,
                chunk.embedding.len(),
                query_vec.len()
            );
        }
        hits.push(SearchHit {
            id: chunk.id,
            source: chunk.source.clone(),
            text: chunk.text.clone(),
            score: cosine_similarity(query_vec, &chunk.embedding),
        });
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    hits.truncate(top_k);

    Ok(hits)
}

/// Embed `query` and search the persisted index.
pub async fn search_index(config: &Config, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
    if top_k == 0 {
        bail!("top_k must be > 0");
    }

    let index = load_index(&config.index.path)?;
    if index.data.is_empty() {
        return Ok(Vec::new());
    }

    let embedder = Embedder::from_config(&config.embedding);
    if embedder.dims() != index.header.embed_dim {
        bail!(
            "Configured embedding dimension {} does not match index dimension {} \
             (the index was built with model '{}')",
            embedder.dims(),
            index.header.embed_dim,
            index.header.model
        );
    }

    let query_vec = embedder.embed_query(query).await?;
    rank_chunks(&query_vec, &index, top_k)
}

/// Run the search command and print results.
pub async fn run_search(config: &Config, query: &str, top_k: usize, json: bool) -> Result<()> {
    let hits = search_index(config, query, top_k).await?;

    if json {
        let response = SearchResponse { hits };
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, hit.score, hit.source);
        let excerpt: String = hit.text.chars().take(160).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    id: {}", hit.id);
        println!();
    }

    Ok(())
}

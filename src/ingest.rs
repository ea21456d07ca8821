//! Indexing pipeline orchestration.
//!
//! Coordinates the full build flow: vault scan → content-hash diff →
//! chunking → batched embedding → index persist. Changed notes have their
//! chunks superseded wholesale; unchanged notes are skipped entirely. The
//! run always completes and reports a summary; per-note problems are
//! recorded, not fatal.

use anyhow::{bail, Result};
use tracing::warn;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::diff::diff_notes;
use crate::embedding::Embedder;
use crate::store::{load_index, persist_index, Index, NewChunk};
use crate::vault::scan_vault;

pub async fn run_build(config: &Config, full: bool, dry_run: bool) -> Result<()> {
    let notes = scan_vault(&config.vault)?;
    let embedder = Embedder::from_config(&config.embedding);

    let mut index = if full {
        Index::empty(embedder.model_name(), embedder.mode(), embedder.dims())
    } else {
        load_index(&config.index.path)?
    };

    // An index built with a different dimension cannot be extended.
    if index.header.embed_dim != 0 && index.header.embed_dim != embedder.dims() {
        bail!(
            "Index at {} has dimension {} but the configured dimension is {} — \
             rerun with --full to rebuild",
            config.index.path.display(),
            index.header.embed_dim,
            embedder.dims()
        );
    }
    if !index.data.is_empty() && index.header.model != embedder.model_name() {
        warn!(
            "index was built with model '{}', now embedding with '{}'",
            index.header.model,
            embedder.model_name()
        );
    }

    let total_notes = notes.len();
    let outcome = diff_notes(notes, &index, config.chunking.overlap);

    for error in &outcome.errors {
        warn!("diff error for {}: {}", error.path, error.reason);
    }

    if dry_run {
        let estimated: usize = outcome
            .to_embed
            .iter()
            .map(|n| chunk_text(&n.content, config.chunking.size, config.chunking.overlap).len())
            .sum();
        println!("build (dry-run)");
        println!("  notes scanned: {}", total_notes);
        println!("  to embed: {}", outcome.to_embed.len());
        println!("  unchanged: {}", outcome.skipped.len());
        println!("  errors: {}", outcome.errors.len());
        println!("  estimated chunks: {}", estimated);
        return Ok(());
    }

    // Chunk every changed note first; ids are assigned by input order
    // below, regardless of how embedding batches complete.
    let mut pending: Vec<(String, u32, String)> = Vec::new();
    for note in &outcome.to_embed {
        index.remove_source(&note.path);
        for (i, text) in chunk_text(&note.content, config.chunking.size, config.chunking.overlap)
            .into_iter()
            .enumerate()
        {
            pending.push((note.path.clone(), i as u32, text));
        }
    }

    let mut chunks_written = 0usize;
    for batch in pending.chunks(config.embedding.batch_size) {
        let texts: Vec<String> = batch.iter().map(|(_, _, text)| text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;

        index.append_chunks(
            batch
                .iter()
                .zip(vectors)
                .map(|((source, chunk_index, text), embedding)| NewChunk {
                    source: source.clone(),
                    chunk_index: *chunk_index,
                    text: text.clone(),
                    embedding,
                })
                .collect(),
        );
        chunks_written += batch.len();
    }

    // First build stamps the embedder's identity into the header.
    if index.header.embed_dim == 0 {
        index.header.model = embedder.model_name();
        index.header.embed_mode = embedder.mode();
        index.header.embed_dim = embedder.dims();
    }

    persist_index(&mut index, &config.index.path)?;

    println!("build");
    println!("  notes scanned: {}", total_notes);
    println!("  embedded notes: {}", outcome.to_embed.len());
    println!("  unchanged notes: {}", outcome.skipped.len());
    println!("  errors: {}", outcome.errors.len());
    println!("  chunks written: {}", chunks_written);
    println!("  index chunks: {}", index.data.len());
    println!(
        "  model: {} (dim {}, mode {})",
        index.header.model, index.header.embed_dim, index.header.embed_mode
    );
    println!("  index: {}", config.index.path.display());
    println!("ok");

    Ok(())
}

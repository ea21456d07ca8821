//! Index and graph statistics.
//!
//! Provides a quick summary of what's indexed: note and chunk counts,
//! embedding identity, and per-source breakdowns, plus concept/cluster
//! counts when the graph artifacts exist. Used by `ckb stats` to give
//! confidence that builds and clustering are working as expected.

use anyhow::Result;
use std::collections::BTreeMap;

use crate::concepts::read_concepts_file;
use crate::config::Config;
use crate::graph::read_clusters_file;
use crate::store::load_index;

/// Run the stats command: read the persisted artifacts and print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let index = load_index(&config.index.path)?;
    let index_size = std::fs::metadata(&config.index.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Cortex KB — Index Stats");
    println!("=======================");
    println!();
    println!("  Index:       {}", config.index.path.display());
    println!("  Size:        {}", format_bytes(index_size));
    println!(
        "  Model:       {} (dim {}, mode {})",
        index.header.model, index.header.embed_dim, index.header.embed_mode
    );
    println!("  Notes:       {}", index.header.files);
    println!("  Chunks:      {}", index.data.len());

    // Per-source breakdown, largest first.
    let mut per_source: BTreeMap<&str, usize> = BTreeMap::new();
    for chunk in &index.data {
        *per_source.entry(chunk.source.as_str()).or_insert(0) += 1;
    }
    let mut sources: Vec<(&str, usize)> = per_source.into_iter().collect();
    sources.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    if !sources.is_empty() {
        println!();
        println!("  Top sources:");
        println!("  {:<48} {:>8}", "SOURCE", "CHUNKS");
        println!("  {}", "-".repeat(58));
        for (source, count) in sources.iter().take(10) {
            println!("  {:<48} {:>8}", source, count);
        }
    }

    if let Ok(concepts) = read_concepts_file(&config.graph.concepts_path) {
        println!();
        println!(
            "  Concepts:    {} (min frequency {})",
            concepts.total_concepts, concepts.min_frequency
        );
    }

    if let Ok(clusters) = read_clusters_file(&config.graph.clusters_path) {
        println!(
            "  Clusters:    {} over {} nodes, {} edges (threshold {})",
            clusters.num_clusters, clusters.num_nodes, clusters.num_edges, clusters.threshold
        );
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

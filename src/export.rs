//! Knowledge-graph export.
//!
//! Joins the cluster partition with full concept metadata to produce a
//! machine-readable graph JSON and a human-oriented markdown report. Pure
//! formatting and truncation; all computation happened upstream.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use crate::concepts::read_concept_embeddings_file;
use crate::config::Config;
use crate::graph::{read_clusters_file, ClustersFile};
use crate::models::Concept;

/// Representative notes shown per cluster in the report.
const MAX_REPRESENTATIVE_NOTES: usize = 5;
/// Members listed per cluster before the collapsed remainder.
const MAX_TOP_MEMBERS: usize = 10;
/// Source-note preview per member in the graph JSON.
const MAX_MEMBER_NOTES: usize = 3;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphExport {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub metadata: GraphMetadata,
    pub clusters: Vec<GraphCluster>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMetadata {
    pub total_concepts: usize,
    pub total_clusters: usize,
    pub embedding_model: String,
    pub clustering_method: String,
    pub similarity_threshold: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphCluster {
    pub id: String,
    /// Label of the core concept.
    pub label: String,
    pub size: usize,
    pub core_concept_id: String,
    pub total_frequency: u64,
    pub members: Vec<GraphMember>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMember {
    pub id: String,
    pub label: String,
    pub frequency: u64,
    pub types: Vec<String>,
    pub source_notes: Vec<String>,
}

/// Build the machine-readable graph structure.
pub fn build_graph_export(
    concepts: &[Concept],
    clusters_file: &ClustersFile,
    embedding_model: &str,
) -> Result<GraphExport> {
    let by_id: HashMap<&str, &Concept> = concepts.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut out_clusters = Vec::with_capacity(clusters_file.clusters.len());
    for cluster in &clusters_file.clusters {
        let core = lookup(&by_id, &cluster.core_concept_id)?;
        let members = cluster
            .member_ids
            .iter()
            .map(|id| {
                let c = lookup(&by_id, id)?;
                Ok(GraphMember {
                    id: c.id.clone(),
                    label: c.label.clone(),
                    frequency: c.frequency,
                    types: c.types.clone(),
                    source_notes: c.source_notes.iter().take(MAX_MEMBER_NOTES).cloned().collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        out_clusters.push(GraphCluster {
            id: cluster.id.clone(),
            label: core.label.clone(),
            size: cluster.size,
            core_concept_id: cluster.core_concept_id.clone(),
            total_frequency: cluster.total_frequency,
            members,
        });
    }

    Ok(GraphExport {
        version: "1.0".to_string(),
        generated_at: Utc::now(),
        metadata: GraphMetadata {
            total_concepts: concepts.len(),
            total_clusters: clusters_file.clusters.len(),
            embedding_model: embedding_model.to_string(),
            clustering_method: clusters_file.method.clone(),
            similarity_threshold: clusters_file.threshold,
        },
        clusters: out_clusters,
    })
}

/// Render the human-oriented markdown report.
///
/// Clusters appear in file order (already size-descending); each shows its
/// top members by frequency and a bounded preview of representative notes
/// from the core concept, with the remainder collapsed.
pub fn render_report(concepts: &[Concept], clusters_file: &ClustersFile) -> Result<String> {
    let by_id: HashMap<&str, &Concept> = concepts.iter().map(|c| (c.id.as_str(), c)).collect();
    let mut lines: Vec<String> = Vec::new();

    lines.push("# Knowledge Clusters".to_string());
    lines.push(String::new());
    lines.push(format!(
        "**Concepts**: {} | **Clusters**: {} | **Method**: {}",
        clusters_file.num_nodes, clusters_file.num_clusters, clusters_file.method
    ));
    lines.push(format!(
        "**Threshold**: {} | **Edges**: {}",
        clusters_file.threshold, clusters_file.num_edges
    ));
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(String::new());

    for (i, cluster) in clusters_file.clusters.iter().enumerate() {
        let core = lookup(&by_id, &cluster.core_concept_id)?;
        let mut members: Vec<&Concept> = cluster
            .member_ids
            .iter()
            .map(|id| lookup(&by_id, id))
            .collect::<Result<_>>()?;
        members.sort_by(|a, b| b.frequency.cmp(&a.frequency).then(a.id.cmp(&b.id)));

        lines.push(format!("## Cluster {}: {}", i + 1, core.label));
        lines.push(String::new());
        lines.push(format!("**ID**: `{}`", cluster.id));
        lines.push(format!("**Size**: {} concepts", cluster.size));
        lines.push(format!("**Total Frequency**: {}", cluster.total_frequency));
        lines.push(String::new());

        lines.push("**Core Concepts**:".to_string());
        for member in members.iter().take(MAX_TOP_MEMBERS) {
            lines.push(format!(
                "- **{}** ({}×) - {}",
                member.label,
                member.frequency,
                member.types.join(", ")
            ));
        }
        lines.push(String::new());

        lines.push("**Representative Notes**:".to_string());
        for note in core.source_notes.iter().take(MAX_REPRESENTATIVE_NOTES) {
            lines.push(format!("- [[{}]]", note));
        }
        lines.push(String::new());

        if members.len() > MAX_TOP_MEMBERS {
            let remaining = &members[MAX_TOP_MEMBERS..];
            lines.push("<details>".to_string());
            lines.push(format!(
                "<summary>Other concepts ({})</summary>",
                remaining.len()
            ));
            lines.push(String::new());
            for member in remaining {
                lines.push(format!("- {} ({}×)", member.label, member.frequency));
            }
            lines.push("</details>".to_string());
            lines.push(String::new());
        }

        lines.push("---".to_string());
        lines.push(String::new());
    }

    lines.push("## Summary".to_string());
    lines.push(String::new());
    lines.push("**Cluster Distribution**:".to_string());
    for (i, cluster) in clusters_file.clusters.iter().enumerate() {
        let core = lookup(&by_id, &cluster.core_concept_id)?;
        let pct = if clusters_file.num_nodes > 0 {
            cluster.size as f64 / clusters_file.num_nodes as f64 * 100.0
        } else {
            0.0
        };
        lines.push(format!(
            "{}. **{}**: {} concepts ({:.1}%)",
            i + 1,
            core.label,
            cluster.size,
            pct
        ));
    }

    Ok(lines.join("\n"))
}

fn lookup<'a>(by_id: &HashMap<&str, &'a Concept>, id: &str) -> Result<&'a Concept> {
    by_id
        .get(id)
        .copied()
        .ok_or_else(|| anyhow::anyhow!("Cluster references unknown concept '{}'", id))
}

/// Export the graph JSON and markdown report from the persisted
/// concept-embeddings and clusters files.
pub fn run_export(config: &Config) -> Result<()> {
    let embeddings = read_concept_embeddings_file(&config.graph.concept_embeddings_path)?;
    let clusters = read_clusters_file(&config.graph.clusters_path)?;

    if embeddings.nodes.is_empty() {
        bail!("No concept embeddings to export");
    }

    let graph = build_graph_export(&embeddings.nodes, &clusters, &embeddings.embedding_model)?;
    let report = render_report(&embeddings.nodes, &clusters)?;

    write_output(&config.graph.graph_json_path, &serde_json::to_string_pretty(&graph)?)?;
    write_output(&config.graph.report_path, &report)?;

    println!("export");
    println!("  clusters: {}", graph.metadata.total_clusters);
    println!("  concepts: {}", graph.metadata.total_concepts);
    println!("  wrote: {}", config.graph.graph_json_path.display());
    println!("  wrote: {}", config.graph.report_path.display());
    println!("ok");
    Ok(())
}

fn write_output(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build_clusters_file;

    fn concept(id: &str, frequency: u64, notes: &[&str], embedding: Vec<f32>) -> Concept {
        Concept {
            id: id.to_string(),
            label: id.to_string(),
            types: vec!["tag".to_string()],
            source_notes: notes.iter().map(|s| s.to_string()).collect(),
            frequency,
            embedding: Some(embedding),
        }
    }

    fn sample() -> (Vec<Concept>, ClustersFile) {
        let concepts = vec![
            concept("rust", 9, &["a.md", "b.md", "c.md", "d.md", "e.md", "f.md"], vec![1.0, 0.0]),
            concept("cargo", 4, &["a.md"], vec![1.0, 0.0]),
            concept("health", 2, &["h.md"], vec![0.0, 1.0]),
        ];
        let clusters = build_clusters_file(&concepts, 0.9).unwrap();
        (concepts, clusters)
    }

    #[test]
    fn test_graph_export_joins_metadata() {
        let (concepts, clusters) = sample();
        let graph = build_graph_export(&concepts, &clusters, "hash-2").unwrap();

        assert_eq!(graph.metadata.total_concepts, 3);
        assert_eq!(graph.metadata.total_clusters, 2);
        assert_eq!(graph.metadata.clustering_method, "connected-components");

        let first = &graph.clusters[0];
        assert_eq!(first.label, "rust");
        assert_eq!(first.size, 2);
        // Member note previews are capped.
        let rust = first.members.iter().find(|m| m.id == "rust").unwrap();
        assert_eq!(rust.source_notes.len(), MAX_MEMBER_NOTES);
    }

    #[test]
    fn test_graph_export_rejects_unknown_member() {
        let (concepts, mut clusters) = sample();
        clusters.clusters[0].member_ids.push("ghost".to_string());
        assert!(build_graph_export(&concepts, &clusters, "hash-2").is_err());
    }

    #[test]
    fn test_report_orders_and_truncates() {
        let (concepts, clusters) = sample();
        let report = render_report(&concepts, &clusters).unwrap();

        assert!(report.starts_with("# Knowledge Clusters"));
        // Largest cluster first, labeled by its core concept.
        assert!(report.contains("## Cluster 1: rust"));
        assert!(report.contains("## Cluster 2: health"));
        // Representative notes capped at five.
        assert!(report.contains("[[e.md]]"));
        assert!(!report.contains("[[f.md]]"));
        assert!(report.contains("**Cluster Distribution**:"));
    }

    #[test]
    fn test_report_collapses_long_member_lists() {
        let mut concepts: Vec<Concept> = (0..14)
            .map(|i| {
                concept(
                    &format!("c{:02}", i),
                    14 - i as u64,
                    &["n.md"],
                    vec![1.0, 0.0],
                )
            })
            .collect();
        concepts.push(concept("lonely", 1, &["x.md"], vec![0.0, 1.0]));
        let clusters = build_clusters_file(&concepts, 0.9).unwrap();
        let report = render_report(&concepts, &clusters).unwrap();

        assert!(report.contains("<summary>Other concepts (4)</summary>"));
        // Top member appears in the main list, not the collapsed one.
        assert!(report.contains("- **c00** (14×)"));
    }
}

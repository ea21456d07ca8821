//! Concept similarity graph and connected-components clustering.
//!
//! Builds a similarity graph by comparing every unordered pair of concept
//! embeddings (quadratic by design, fine for corpora in the low thousands
//! of concepts; an approximate-nearest-neighbor pass would be the future
//! extension for anything larger, without changing these semantics), then
//! partitions the graph into clusters with a Union-Find over node indices.
//!
//! Edges and clusters are always recomputed from scratch per run; nothing
//! here is incremental.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::concepts::read_concept_embeddings_file;
use crate::config::Config;
use crate::embedding::cosine_similarity;
use crate::models::{Cluster, Concept, Edge};

/// Serialized clusters file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClustersFile {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    /// Always `connected-components`.
    pub method: String,
    pub threshold: f32,
    pub num_clusters: usize,
    pub num_nodes: usize,
    pub num_edges: usize,
    pub clusters: Vec<Cluster>,
    pub node_mapping: Vec<NodeMapping>,
}

/// Node-to-cluster lookup entry.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMapping {
    pub id: String,
    pub cluster_id: String,
}

/// Compare every unordered concept pair and emit an edge where cosine
/// similarity meets the threshold.
///
/// Edge endpoints are ordered lexicographically by concept id so each pair
/// is represented exactly once. Self-pairs are never compared. Fails if
/// any concept is missing its embedding or dimensions disagree.
pub fn build_edges(concepts: &[Concept], threshold: f32) -> Result<Vec<Edge>> {
    let embeddings: Vec<&[f32]> = concepts
        .iter()
        .map(|c| {
            c.embedding
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Concept '{}' has no embedding", c.id))
        })
        .collect::<Result<_>>()?;

    if let Some(first) = embeddings.first() {
        for (concept, emb) in concepts.iter().zip(&embeddings) {
            if emb.len() != first.len() {
                bail!(
                    "Embedding dimension mismatch: '{}' has {} (expected {})",
                    concept.id,
                    emb.len(),
                    first.len()
                );
            }
        }
    }

    let mut edges = Vec::new();
    for i in 0..concepts.len() {
        for j in (i + 1)..concepts.len() {
            let weight = cosine_similarity(embeddings[i], embeddings[j]);
            if weight >= threshold {
                let (a, b) = if concepts[i].id <= concepts[j].id {
                    (i, j)
                } else {
                    (j, i)
                };
                edges.push(Edge {
                    source: concepts[a].id.clone(),
                    target: concepts[b].id.clone(),
                    weight,
                });
            }
        }
    }

    Ok(edges)
}

/// Disjoint-set union over node indices, arena-style.
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    /// Find the root of `x`, compressing the path iteratively: one pass up
    /// to locate the root, a second pass rewriting parents to point at it.
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Union by rank: the lower-rank root is attached under the higher.
    pub fn union(&mut self, x: usize, y: usize) {
        let root_x = self.find(x);
        let root_y = self.find(y);
        if root_x == root_y {
            return;
        }

        if self.rank[root_x] < self.rank[root_y] {
            self.parent[root_x] = root_y;
        } else if self.rank[root_x] > self.rank[root_y] {
            self.parent[root_y] = root_x;
        } else {
            self.parent[root_y] = root_x;
            self.rank[root_x] += 1;
        }
    }

    /// Group all node indices by root, in first-discovery order so output
    /// is deterministic across identical inputs.
    pub fn components(&mut self) -> Vec<Vec<usize>> {
        let mut index_of_root = std::collections::HashMap::new();
        let mut components: Vec<Vec<usize>> = Vec::new();

        for i in 0..self.parent.len() {
            let root = self.find(i);
            let idx = *index_of_root.entry(root).or_insert_with(|| {
                components.push(Vec::new());
                components.len() - 1
            });
            components[idx].push(i);
        }

        components
    }
}

/// Cluster concepts by connected components over the given edges.
///
/// Components are sorted by size descending (stable: ties keep discovery
/// order) and assigned `cluster-<rank>` ids. Each cluster's core concept is
/// the member with the highest frequency, ties broken by smallest id.
/// Isolated nodes form singleton clusters; the result is a true partition.
pub fn cluster_concepts(concepts: &[Concept], edges: &[Edge]) -> Vec<Cluster> {
    let index_by_id: std::collections::HashMap<&str, usize> = concepts
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();

    let mut uf = UnionFind::new(concepts.len());
    for edge in edges {
        if let (Some(&a), Some(&b)) = (
            index_by_id.get(edge.source.as_str()),
            index_by_id.get(edge.target.as_str()),
        ) {
            uf.union(a, b);
        }
    }

    let mut components = uf.components();
    components.sort_by_key(|c| std::cmp::Reverse(c.len()));

    components
        .into_iter()
        .enumerate()
        .map(|(rank, members)| {
            let core = members
                .iter()
                .map(|&i| &concepts[i])
                .max_by(|a, b| {
                    a.frequency
                        .cmp(&b.frequency)
                        .then_with(|| b.id.cmp(&a.id))
                })
                .expect("components are never empty");

            Cluster {
                id: format!("cluster-{}", rank),
                member_ids: members.iter().map(|&i| concepts[i].id.clone()).collect(),
                size: members.len(),
                core_concept_id: core.id.clone(),
                total_frequency: members.iter().map(|&i| concepts[i].frequency).sum(),
            }
        })
        .collect()
}

/// Assemble the full clusters file for a set of embedded concepts.
pub fn build_clusters_file(concepts: &[Concept], threshold: f32) -> Result<ClustersFile> {
    let edges = build_edges(concepts, threshold)?;
    let clusters = cluster_concepts(concepts, &edges);

    let mut cluster_of: std::collections::HashMap<&str, &str> = std::collections::HashMap::new();
    for cluster in &clusters {
        for member in &cluster.member_ids {
            cluster_of.insert(member.as_str(), cluster.id.as_str());
        }
    }

    let node_mapping = concepts
        .iter()
        .map(|c| NodeMapping {
            id: c.id.clone(),
            cluster_id: cluster_of
                .get(c.id.as_str())
                .map(|s| s.to_string())
                .unwrap_or_default(),
        })
        .collect();

    Ok(ClustersFile {
        version: "1.0".to_string(),
        generated_at: Utc::now(),
        method: "connected-components".to_string(),
        threshold,
        num_clusters: clusters.len(),
        num_nodes: concepts.len(),
        num_edges: edges.len(),
        clusters,
        node_mapping,
    })
}

pub fn read_clusters_file(path: &std::path::Path) -> Result<ClustersFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read clusters file {}: {}", path.display(), e))?;
    serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Malformed clusters file {}: {}", path.display(), e))
}

/// Cluster the embedded concepts and write the clusters file.
pub fn run_cluster(config: &Config, threshold_override: Option<f32>) -> Result<()> {
    let embeddings = read_concept_embeddings_file(&config.graph.concept_embeddings_path)?;
    if embeddings.nodes.is_empty() {
        bail!(
            "No concept embeddings in {} — run `ckb concepts embed` first",
            config.graph.concept_embeddings_path.display()
        );
    }

    let threshold = threshold_override.unwrap_or(config.graph.similarity_threshold);
    let file = build_clusters_file(&embeddings.nodes, threshold)?;

    let path = &config.graph.clusters_path;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(&file)?)?;

    println!("cluster");
    println!("  nodes: {}", file.num_nodes);
    println!("  edges: {} (threshold {})", file.num_edges, threshold);
    println!("  clusters: {}", file.num_clusters);
    if let Some(largest) = file.clusters.first() {
        println!(
            "  largest: {} ({} members, core {})",
            largest.id, largest.size, largest.core_concept_id
        );
    }
    println!("  wrote: {}", path.display());
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn concept(id: &str, frequency: u64, embedding: Vec<f32>) -> Concept {
        Concept {
            id: id.to_string(),
            label: id.to_string(),
            types: vec!["tag".to_string()],
            source_notes: vec![format!("{}.md", id)],
            frequency,
            embedding: Some(embedding),
        }
    }

    #[test]
    fn test_build_edges_threshold_and_ordering() {
        let concepts = vec![
            concept("b", 1, vec![1.0, 0.0]),
            concept("a", 1, vec![0.96, 0.28]),
            concept("c", 1, vec![0.0, 1.0]),
        ];
        let edges = build_edges(&concepts, 0.9).unwrap();
        assert_eq!(edges.len(), 1);
        // Endpoints ordered by id, not input position.
        assert_eq!(edges[0].source, "a");
        assert_eq!(edges[0].target, "b");
        assert!(edges[0].weight >= 0.9);
    }

    #[test]
    fn test_build_edges_rejects_missing_embedding() {
        let mut c = concept("a", 1, vec![1.0, 0.0]);
        c.embedding = None;
        assert!(build_edges(&[c], 0.5).is_err());
    }

    #[test]
    fn test_build_edges_rejects_dimension_mismatch() {
        let concepts = vec![
            concept("a", 1, vec![1.0, 0.0]),
            concept("b", 1, vec![1.0, 0.0, 0.0]),
        ];
        assert!(build_edges(&concepts, 0.5).is_err());
    }

    #[test]
    fn test_union_find_five_nodes_two_clusters() {
        // Edges (0,1), (1,2), (3,4) => components {0,1,2} and {3,4}.
        let mut uf = UnionFind::new(5);
        uf.union(0, 1);
        uf.union(1, 2);
        uf.union(3, 4);

        let components = uf.components();
        assert_eq!(components.len(), 2);
        let mut sizes: Vec<usize> = components.iter().map(|c| c.len()).collect();
        sizes.sort();
        assert_eq!(sizes, vec![2, 3]);
    }

    #[test]
    fn test_union_find_path_compression_flattens() {
        let mut uf = UnionFind::new(4);
        uf.union(0, 1);
        uf.union(1, 2);
        uf.union(2, 3);
        let root = uf.find(3);
        // After find, every node points directly at the root.
        for i in 0..4 {
            assert_eq!(uf.parent[i], root);
        }
    }

    #[test]
    fn test_isolated_nodes_become_singletons() {
        let concepts = vec![
            concept("a", 1, vec![1.0, 0.0]),
            concept("b", 1, vec![0.0, 1.0]),
        ];
        let edges = build_edges(&concepts, 0.99).unwrap();
        assert!(edges.is_empty());
        let clusters = cluster_concepts(&concepts, &edges);
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| c.size == 1));
    }

    #[test]
    fn test_clusters_sorted_by_size_with_rank_ids() {
        let concepts = vec![
            concept("a", 1, vec![1.0, 0.0]),
            concept("b", 2, vec![1.0, 0.0]),
            concept("c", 3, vec![1.0, 0.0]),
            concept("d", 1, vec![0.0, 1.0]),
            concept("e", 1, vec![0.0, 1.0]),
        ];
        let edges = build_edges(&concepts, 0.99).unwrap();
        let clusters = cluster_concepts(&concepts, &edges);

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].id, "cluster-0");
        assert_eq!(clusters[0].size, 3);
        assert_eq!(clusters[1].id, "cluster-1");
        assert_eq!(clusters[1].size, 2);
        assert_eq!(clusters[0].total_frequency, 6);
    }

    #[test]
    fn test_core_concept_max_frequency_ties_smallest_id() {
        let concepts = vec![
            concept("zeta", 5, vec![1.0, 0.0]),
            concept("alpha", 5, vec![1.0, 0.0]),
            concept("mid", 2, vec![1.0, 0.0]),
        ];
        let edges = build_edges(&concepts, 0.99).unwrap();
        let clusters = cluster_concepts(&concepts, &edges);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].core_concept_id, "alpha");
    }

    #[test]
    fn test_partition_property_over_random_graphs() {
        // Seeded LCG so the "random" graphs are reproducible.
        let mut state: u64 = 0x2545F4914F6CDD1D;
        let mut next = move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as usize
        };

        for n in [1usize, 5, 17, 64] {
            let concepts: Vec<Concept> = (0..n)
                .map(|i| concept(&format!("n{:03}", i), (i % 7 + 1) as u64, vec![1.0]))
                .collect();

            let edge_count = next() % (n * 2 + 1);
            let edges: Vec<Edge> = (0..edge_count)
                .map(|_| {
                    let a = next() % n;
                    let b = next() % n;
                    Edge {
                        source: format!("n{:03}", a.min(b)),
                        target: format!("n{:03}", a.max(b)),
                        weight: 1.0,
                    }
                })
                .filter(|e| e.source != e.target)
                .collect();

            let clusters = cluster_concepts(&concepts, &edges);

            // True partition: every node exactly once across all clusters.
            let mut seen = HashSet::new();
            for cluster in &clusters {
                assert_eq!(cluster.size, cluster.member_ids.len());
                for id in &cluster.member_ids {
                    assert!(seen.insert(id.clone()), "node {} in two clusters", id);
                }
            }
            assert_eq!(seen.len(), n, "partition misses nodes for n={}", n);
        }
    }

    #[test]
    fn test_threshold_monotonicity() {
        // Deterministic node set with varied similarities.
        let concepts: Vec<Concept> = (0..12)
            .map(|i| {
                let angle = i as f32 * 0.2;
                concept(
                    &format!("c{:02}", i),
                    1,
                    vec![angle.cos(), angle.sin()],
                )
            })
            .collect();

        let mut prev_edges = usize::MAX;
        let mut prev_clusters = 0usize;
        for threshold in [0.0f32, 0.3, 0.6, 0.9, 0.99] {
            let edges = build_edges(&concepts, threshold).unwrap();
            let clusters = cluster_concepts(&concepts, &edges);
            assert!(edges.len() <= prev_edges, "edges grew at {}", threshold);
            assert!(
                clusters.len() >= prev_clusters,
                "clusters shrank at {}",
                threshold
            );
            prev_edges = edges.len();
            prev_clusters = clusters.len();
        }
    }

    #[test]
    fn test_clusters_file_node_mapping_is_complete() {
        let concepts = vec![
            concept("a", 2, vec![1.0, 0.0]),
            concept("b", 1, vec![1.0, 0.0]),
            concept("c", 1, vec![0.0, 1.0]),
        ];
        let file = build_clusters_file(&concepts, 0.9).unwrap();
        assert_eq!(file.method, "connected-components");
        assert_eq!(file.num_nodes, 3);
        assert_eq!(file.node_mapping.len(), 3);
        for mapping in &file.node_mapping {
            assert!(mapping.cluster_id.starts_with("cluster-"));
        }
    }
}

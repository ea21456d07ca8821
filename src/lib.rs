//! # Cortex KB
//!
//! A local-first knowledge indexing and retrieval engine for plain-text
//! note vaults.
//!
//! Cortex KB turns a vault of markdown notes into two searchable artifacts:
//! a chunk-level embedding index answering top-K cosine queries, and a
//! concept-level similarity graph partitioned into clusters for browsing.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────────┐   ┌────────────┐
//! │   Vault   │──▶│ Diff + Chunk  │──▶│ JSON Index │──▶ top-K search
//! │  (*.md)   │   │  + Embed      │   │  (chunks)  │
//! └───────────┘   └───────────────┘   └────────────┘
//!       │
//!       ▼
//! ┌───────────┐   ┌───────────────┐   ┌────────────┐
//! │ Concepts  │──▶│  Similarity   │──▶│  Clusters  │──▶ graph + report
//! │ (extract) │   │ graph (O(n²)) │   │ (union-find)│
//! └───────────┘   └───────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ckb build                     # scan the vault, embed changed notes
//! ckb search "deployment"       # top-K retrieval
//! ckb concepts extract          # tags/links/headings -> concepts
//! ckb concepts embed            # concept vectors
//! ckb cluster                   # connected-components clustering
//! ckb export                    # graph JSON + markdown brain map
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`models`] | Core data types |
//! | [`vault`] | Vault scanning |
//! | [`chunk`] | Sliding-window text chunking |
//! | [`embedding`] | Local hash and external embedding strategies |
//! | [`diff`] | Content-hash differencing for incremental builds |
//! | [`store`] | Durable chunk index (load/persist/append) |
//! | [`search`] | Top-K cosine retrieval |
//! | [`concepts`] | Concept extraction and embedding |
//! | [`graph`] | Similarity graph and union-find clustering |
//! | [`export`] | Graph JSON and markdown report |
//! | [`ingest`] | Build pipeline orchestration |

pub mod chunk;
pub mod concepts;
pub mod config;
pub mod diff;
pub mod embedding;
pub mod export;
pub mod graph;
pub mod ingest;
pub mod models;
pub mod search;
pub mod stats;
pub mod store;
pub mod vault;

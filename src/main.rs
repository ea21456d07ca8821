//! # Cortex KB CLI (`ckb`)
//!
//! The `ckb` binary drives the indexing and retrieval pipeline. It provides
//! commands for building the chunk index, searching it, extracting and
//! embedding concepts, clustering the concept graph, and exporting a
//! browsable knowledge map.
//!
//! ## Usage
//!
//! ```bash
//! ckb --config ./cortex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ckb build` | Scan the vault, embed new/changed notes, persist the index |
//! | `ckb search "<query>"` | Top-K cosine retrieval over indexed chunks |
//! | `ckb concepts extract` | Extract tag/link/heading concepts from the vault |
//! | `ckb concepts embed` | Embed extracted concepts |
//! | `ckb cluster` | Cluster concept embeddings via connected components |
//! | `ckb export` | Export the graph JSON and markdown report |
//! | `ckb stats` | Show index and graph statistics |
//!
//! All settings come from the TOML config file; the recognized environment
//! variables (`EMBED_MODE`, `EMBED_DIMENSION`, `EMBEDDING_MODEL`,
//! `SIMILARITY_THRESHOLD`, `CHUNK_SIZE`, `CHUNK_OVERLAP`,
//! `MIN_CONCEPT_FREQUENCY`, `INDEX_PATH`) override it.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cortex_kb::{concepts, config, export, graph, ingest, search, stats};

/// Cortex KB: a local-first knowledge indexing and retrieval engine for
/// plain-text note vaults.
#[derive(Parser)]
#[command(
    name = "ckb",
    about = "Cortex KB — a local-first knowledge indexing and retrieval engine",
    version,
    long_about = "Cortex KB chunks and embeds a vault of markdown notes into a searchable \
    JSON index, extracts recurring concepts, clusters them by embedding similarity, and \
    exports a browsable knowledge map."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file is fine; defaults plus environment overrides apply.
    #[arg(long, global = true, default_value = "./cortex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Build or update the chunk index from the vault.
    ///
    /// Scans the vault, diffs note content hashes against the index,
    /// chunks and embeds only changed notes, and persists atomically.
    /// The run always completes; per-note problems are reported in the
    /// summary instead of aborting.
    Build {
        /// Ignore the existing index and rebuild everything from scratch.
        #[arg(long)]
        full: bool,

        /// Show note and chunk counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search indexed chunks by cosine similarity.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of hits to return.
        #[arg(long, default_value_t = 5)]
        top_k: usize,

        /// Print the transport response shape as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Manage concept extraction and embedding.
    Concepts {
        #[command(subcommand)]
        action: ConceptsAction,
    },

    /// Cluster concept embeddings into connected components.
    Cluster {
        /// Override the similarity threshold from config.
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Export the clustered graph as JSON plus a markdown report.
    Export,

    /// Show index and graph statistics.
    Stats,
}

/// Concept pipeline subcommands.
#[derive(Subcommand)]
enum ConceptsAction {
    /// Extract concepts (tags, links, headings, frontmatter) from the vault.
    ///
    /// Concepts below the configured minimum frequency are dropped.
    Extract,

    /// Embed every extracted concept with the configured strategy.
    Embed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build { full, dry_run } => {
            ingest::run_build(&cfg, full, dry_run).await?;
        }
        Commands::Search { query, top_k, json } => {
            search::run_search(&cfg, &query, top_k, json).await?;
        }
        Commands::Concepts { action } => match action {
            ConceptsAction::Extract => {
                concepts::run_extract(&cfg)?;
            }
            ConceptsAction::Embed => {
                concepts::run_embed_concepts(&cfg).await?;
            }
        },
        Commands::Cluster { threshold } => {
            graph::run_cluster(&cfg, threshold)?;
        }
        Commands::Export => {
            export::run_export(&cfg)?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
    }

    Ok(())
}

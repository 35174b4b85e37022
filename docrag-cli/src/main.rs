use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docrag::{
    Embedder, EmbeddingBackend, EmbeddingConfig, IngestionPipeline, RagConfig, RetrievalResult,
    Retriever, RetrieverStats, Snapshot,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "docrag",
    version,
    about = "Ingest document trees into a vector snapshot and query it"
)]
struct Cli {
    /// Embedding backend (openai or local); defaults to DOCRAG_EMBEDDING_BACKEND
    #[arg(long, global = true)]
    backend: Option<EmbeddingBackend>,

    /// Embedding model; defaults to DOCRAG_EMBEDDING_MODEL or the backend default
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk, embed and index a file or directory
    Ingest {
        /// File or directory to ingest
        #[arg(short = 'c', long)]
        corpus_path: PathBuf,

        /// Directory the snapshot is written to
        #[arg(short, long, default_value = "./data/vectors")]
        output: PathBuf,

        /// Maximum chunk size in characters
        #[arg(long, default_value_t = 512)]
        chunk_size: usize,

        /// Overlap between consecutive chunks in characters
        #[arg(long, default_value_t = 50)]
        chunk_overlap: usize,

        /// Smallest buffered section the markdown chunker flushes on its own
        #[arg(long, default_value_t = 100)]
        min_chunk_size: usize,
    },
    /// Retrieve the chunks most relevant to a query
    Query {
        query: String,

        /// Snapshot directory
        #[arg(long, default_value = "./data/vectors")]
        vectors: PathBuf,

        #[arg(long, default_value_t = 5)]
        top_k: usize,

        /// Minimum similarity in (0, 1]
        #[arg(long, default_value_t = 0.0)]
        threshold: f32,

        /// Skip keyword-overlap reranking
        #[arg(long, default_value_t = false)]
        no_rerank: bool,

        /// Fuse semantic and keyword scores
        #[arg(long, default_value_t = false)]
        hybrid: bool,

        /// Weight of semantic similarity in hybrid mode
        #[arg(long, default_value_t = 0.7, requires = "hybrid")]
        semantic_weight: f32,

        /// Print results as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print statistics about a snapshot as JSON; needs no embedding backend
    Stats {
        /// Snapshot directory
        #[arg(long, default_value = "./data/vectors")]
        vectors: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Ingest { corpus_path, output, chunk_size, chunk_overlap, min_chunk_size } => {
            let config = RagConfig::builder()
                .chunk_size(chunk_size)
                .chunk_overlap(chunk_overlap)
                .min_chunk_size(min_chunk_size)
                .embedding(embedding_config(cli.backend, cli.model)?)
                .build()?;
            let report = IngestionPipeline::from_config(&config)?
                .ingest(&corpus_path, config.chunk_size, config.chunk_overlap, &output)
                .await
                .with_context(|| format!("failed to ingest {}", corpus_path.display()))?;

            println!(
                "Ingested {} documents, {} chunks",
                report.documents_processed, report.chunks_created
            );
            for error in &report.errors {
                println!("  error: {error}");
            }
        }
        Command::Query {
            query,
            vectors,
            top_k,
            threshold,
            no_rerank,
            hybrid,
            semantic_weight,
            json,
        } => {
            let config = RagConfig::builder()
                .top_k(top_k)
                .similarity_threshold(threshold)
                .rerank(!no_rerank)
                .semantic_weight(semantic_weight)
                .embedding(embedding_config(cli.backend, cli.model)?)
                .build()?;
            let retriever = open_retriever(&vectors, &config)?;
            if !retriever.is_loaded() {
                bail!("no snapshot found at {}; run `docrag ingest` first", vectors.display());
            }

            let results = if hybrid {
                retriever
                    .retrieve_hybrid(&query, config.top_k, config.similarity_threshold, None)
                    .await?
            } else {
                retriever
                    .retrieve(&query, config.top_k, config.similarity_threshold, config.rerank)
                    .await?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results);
            }
        }
        Command::Stats { vectors } => {
            let snapshot = Snapshot::load(&vectors)
                .with_context(|| format!("failed to read snapshot at {}", vectors.display()))?;
            let Some(snapshot) = snapshot else {
                bail!("no snapshot found at {}; run `docrag ingest` first", vectors.display());
            };
            let stats = RetrieverStats::from_snapshot(&snapshot, &vectors);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

/// Environment settings, overridden by command-line flags.
fn embedding_config(
    backend: Option<EmbeddingBackend>,
    model: Option<String>,
) -> Result<EmbeddingConfig> {
    let mut config = EmbeddingConfig::from_env().context("invalid embedding environment")?;
    if let Some(backend) = backend {
        if backend != config.backend {
            config.backend = backend;
            config.model = backend.default_model().to_string();
        }
    }
    if let Some(model) = model {
        config.model = model;
    }
    config.validate()?;
    debug!(?config, "embedding configuration resolved");
    Ok(config)
}

fn open_retriever(vectors: &Path, config: &RagConfig) -> Result<Retriever> {
    let embedder = Embedder::from_config(&config.embedding)?;
    Retriever::open(vectors, embedder, config.retrieval_settings())
        .with_context(|| format!("failed to open snapshot at {}", vectors.display()))
}

fn print_results(results: &[RetrievalResult]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }
    for (rank, result) in results.iter().enumerate() {
        let source = result.metadata.get("source").and_then(|v| v.as_str()).unwrap_or("-");
        println!("{}. [{:.4}] {} ({source})", rank + 1, result.score, result.id);
        for line in result.content.lines().take(4) {
            println!("   {line}");
        }
        println!();
    }
}

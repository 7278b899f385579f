mod init;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use coderag_core::bootstrap::{Pipeline, resolve_config_path};
use coderag_core::config::Config;
use coderag_index::context::chunk_display_header;
use coderag_index::{IndexSummary, IndexWatcher, RerankStatus, SearchResponse, VectorIndex};
use tokio::sync::watch;

/// Semantic code search over a local repository.
#[derive(Parser)]
#[command(name = "coderag", version, about)]
struct Cli {
    /// Configuration file (TOML). Defaults to `CODERAG_CONFIG`, then `./coderag.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactively write a starter configuration file.
    Init {
        /// Where to write the file; prompted for when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    #[command(flatten)]
    Pipeline(PipelineCommand),
}

/// Commands that run against a built pipeline.
#[derive(Subcommand)]
enum PipelineCommand {
    /// Incrementally index a repository.
    Index {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Search the index.
    Search {
        query: String,

        /// Number of results; defaults to `search.top_k`.
        #[arg(long, short = 'k')]
        top_k: Option<usize>,

        /// Skip the reranking stage.
        #[arg(long)]
        no_rerank: bool,
    },

    /// Index a repository, then re-index on file changes until interrupted.
    Watch {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Show index statistics and model server reachability.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();
    let cli = Cli::parse();

    let command = match cli.command {
        Command::Init { output } => return init::run(output),
        Command::Pipeline(command) => command,
    };

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let pipeline = Pipeline::build(config)
        .await
        .context("failed to build pipeline")?;

    match command {
        PipelineCommand::Index { path } => {
            let root = canonical_root(&path)?;
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            spawn_ctrl_c(shutdown_tx);
            let summary = pipeline
                .indexer()
                .index_repository(&root, &shutdown_rx)
                .await
                .context("indexing aborted")?;
            print_summary(&summary);
        }
        PipelineCommand::Search {
            query,
            top_k,
            no_rerank,
        } => {
            let top_k = top_k.unwrap_or(pipeline.config().search.top_k);
            let response = if no_rerank {
                pipeline.search().search_without_rerank(&query, top_k).await
            } else {
                pipeline.search().search(&query, top_k).await
            }
            .context("search failed")?;
            print_response(&response);
        }
        PipelineCommand::Watch { path } => {
            let root = canonical_root(&path)?;
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            spawn_ctrl_c(shutdown_tx);

            let summary = pipeline
                .indexer()
                .index_repository(&root, &shutdown_rx)
                .await
                .context("initial indexing aborted")?;
            print_summary(&summary);
            if summary.cancelled {
                return Ok(());
            }

            let watcher = IndexWatcher::start(&root, pipeline.indexer().clone(), shutdown_rx)
                .context("failed to start file watcher")?;
            println!("Watching {} (Ctrl-C to stop)", root.display());
            watcher.join().await;
        }
        PipelineCommand::Status => {
            let stats = pipeline.index().stats().await?;
            let health = pipeline.health().await;
            println!("Index:      {}", pipeline.config().index.db_path);
            println!("Files:      {}", stats.files);
            println!("Chunks:     {}", stats.chunks);
            match stats.dimension {
                Some(d) => println!("Dimension:  {d}"),
                None => println!("Dimension:  (not set)"),
            }
            println!(
                "Server:     {} ({})",
                if health.reachable { "reachable" } else { "unreachable" },
                health.detail
            );
        }
    }

    Ok(())
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn spawn_ctrl_c(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl-c: {e}");
            return;
        }
        tracing::info!("shutdown requested, finishing in-flight files");
        let _ = shutdown_tx.send(true);
    });
}

fn canonical_root(path: &Path) -> anyhow::Result<PathBuf> {
    let root = path
        .canonicalize()
        .with_context(|| format!("cannot access {}", path.display()))?;
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    Ok(root)
}

fn print_summary(summary: &IndexSummary) {
    println!(
        "Scanned {} files: {} indexed, {} skipped, {} removed ({} chunks written, {} removed) in {} ms",
        summary.files_scanned,
        summary.files_indexed,
        summary.files_skipped,
        summary.files_removed,
        summary.chunks_written,
        summary.chunks_removed,
        summary.duration_ms,
    );
    if summary.cancelled {
        println!("Run cancelled; stale files were not cleaned up.");
    }
    if !summary.errors.is_empty() {
        println!("{} files failed:", summary.errors.len());
        for (path, message) in &summary.errors {
            println!("  {path}: {message}");
        }
    }
}

fn print_response(response: &SearchResponse) {
    if let RerankStatus::Skipped { reason } = &response.rerank {
        println!("(reranking skipped: {reason})");
    }
    if response.results.is_empty() {
        println!("No results.");
    }
    for (rank, result) in response.results.iter().enumerate() {
        println!(
            "{}. [{} {:.4}] {}",
            rank + 1,
            response.stage.as_str(),
            result.score,
            chunk_display_header(&result.chunk)
        );
        for line in result.chunk.content.lines().take(8) {
            println!("    {line}");
        }
        println!();
    }
    println!(
        "{} results in {} ms",
        response.results.len(),
        response.elapsed.as_millis()
    );
}

//! CLI entry point for the sift document store (indexing, search, maintenance).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sift_core::{
    app_data_dir, build_backend, extract_links, index_sources, load_config, load_config_from,
    model_cache_dir, read_source, scan_sources, Config, EmbeddingStore, TracingObserver,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sift")]
#[command(about = "sift: semantic search over a local document store")]
struct Cli {
    /// Config file (default: config.toml in the app data directory).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging, including per-search score diagnostics.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show document count, last update and staleness.
    Status,
    /// Show where sift stores its config, store file and models.
    DataDir,
    /// Chunk, embed and add a file or a directory of .md/.txt files, then save.
    Index {
        #[arg(value_name = "PATH")]
        path: PathBuf,
        /// Source URL recorded on every chunk (single file only).
        #[arg(long)]
        url: Option<String>,
        /// Title recorded on every chunk (single file only).
        #[arg(long)]
        title: Option<String>,
        /// Crawl depth recorded on every chunk.
        #[arg(long, default_value_t = 0)]
        depth: i32,
        /// Clear the store before indexing.
        #[arg(long)]
        clear: bool,
    },
    /// Search the store.
    Search {
        query: String,
        /// Maximum results (0 = unlimited). Defaults to the config value.
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Minimum similarity. Defaults to the config value.
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Remove every document and save the empty store.
    Clear,
    /// List links in a file that start with a base URL.
    Links {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        base: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => load_config_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => load_config(),
    };

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => {
            let store = EmbeddingStore::new(config.store_path()?);
            store.load().await?;
            println!("sift store");
            println!("  path:         {}", store.path().display());
            println!("  documents:    {}", store.len().await);
            let last = store.last_updated().await;
            println!("  last updated: {}", if last.is_empty() { "never" } else { last.as_str() });
            println!("  stale:        {}", store.is_stale(config.search.max_age_days).await);
        }
        Commands::DataDir => match app_data_dir() {
            Some(p) => println!("{}", p.display()),
            None => eprintln!("Could not determine app data directory."),
        },
        Commands::Index {
            path,
            url,
            title,
            depth,
            clear,
        } => {
            let mut sources = if path.is_dir() {
                scan_sources(&path)?
            } else {
                let mut source = read_source(&path)?;
                if let Some(url) = url {
                    source.url = url;
                }
                if let Some(title) = title {
                    source.title = title;
                }
                vec![source]
            };
            for s in &mut sources {
                s.depth = depth;
            }

            let store = open_store(&config).await?;
            if clear {
                store.clear().await;
            }
            let result = index_sources(&store, &sources, config.chunking).await;
            if result.is_ok() {
                store.save().await?;
            }
            store.destroy();
            let added = result?;
            println!(
                "Indexed {} chunk(s) from {} source(s); store now holds {}",
                added,
                sources.len(),
                store.len().await
            );
        }
        Commands::Search {
            query,
            top_k,
            threshold,
            json,
        } => {
            let store = open_store(&config).await?;
            if store.is_stale(config.search.max_age_days).await {
                tracing::warn!("store is stale; consider re-indexing");
            }
            let result = store
                .search(
                    &query,
                    top_k.unwrap_or(config.search.top_k),
                    threshold.unwrap_or(config.search.threshold),
                )
                .await;
            store.destroy();
            let results = result?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No matches.");
            } else {
                for (i, r) in results.iter().enumerate() {
                    let doc = &r.document;
                    let label = if doc.title.is_empty() { &doc.id } else { &doc.title };
                    println!("{:>2}. [{:.4}] {}", i + 1, r.similarity, label);
                    if !doc.url.is_empty() {
                        println!("    {}", doc.url);
                    }
                    println!("    {}", snippet(&doc.content, 160));
                }
            }
        }
        Commands::Clear => {
            let store = EmbeddingStore::new(config.store_path()?);
            store.load().await?;
            store.clear().await;
            store.save().await?;
            println!("Cleared {}", store.path().display());
        }
        Commands::Links { file, base } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            for link in extract_links(&content, &base) {
                println!("{link}");
            }
        }
    }
    Ok(())
}

/// Loads the store from disk with the configured provider attached.
async fn open_store(config: &Config) -> anyhow::Result<EmbeddingStore> {
    let backend = build_backend(&config.provider, model_cache_dir())
        .context("failed to start embedding provider")?;
    let mut store = EmbeddingStore::new(config.store_path()?)
        .with_provider(backend.provider)
        .with_observer(Arc::new(TracingObserver));
    if let Some(session) = backend.session {
        store = store.with_session(session);
    }
    if let Err(e) = store.load().await {
        store.destroy();
        return Err(e.into());
    }
    Ok(store)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn snippet(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::AppConfig;
use semfind_indexer::{
    drive_pipeline, ChangeWatcher, IndexingPipeline, PlainTextExtractor, WatcherConfig,
};
use semfind_metadata_store::{IndexingState, MetadataStore};
use semfind_protocol::IndexStatus;
use semfind_search::{QueryParser, SearchCoordinator};
use semfind_vector_store::{ApproximateIndex, EmbeddingProvider, ProviderKind, VectorStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "semfind", version, about = "Local semantic file search")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a directory and remember it for watching.
    Index {
        directory: PathBuf,
    },
    /// Search the index with a natural-language query.
    Search {
        query: String,
        /// Maximum number of results.
        #[arg(short = 'k', long)]
        limit: Option<usize>,
    },
    /// Show index statistics.
    Status,
    /// Drop the whole index (vectors and metadata).
    Clear,
    /// Watch the configured directories and index changes as they happen.
    Watch {
        /// Extra directories to watch for this session.
        directories: Vec<PathBuf>,
    },
}

struct App {
    config: AppConfig,
    vectors: VectorStore,
    metadata: MetadataStore,
    approximate: ApproximateIndex,
    provider: Arc<EmbeddingProvider>,
}

impl App {
    async fn open(config: AppConfig) -> Result<Self> {
        let data_dir = AppConfig::data_dir();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;

        let vectors = VectorStore::open_or_create(
            data_dir.join("vectors.bin"),
            config.embedding_dimension,
        )
        .context("opening vector store (a dimension mismatch means the embedding model changed; run `semfind clear` and re-index)")?;
        let metadata = MetadataStore::open(&data_dir).await?;

        let provider = match config.embedding_provider {
            ProviderKind::Http => Arc::new(EmbeddingProvider::http(
                config.embedding_endpoint.clone(),
                config.embedding_model.clone(),
                config.embedding_dimension,
                Duration::from_secs(config.embed_timeout_secs),
            )),
            ProviderKind::Stub => Arc::new(EmbeddingProvider::stub(config.embedding_dimension)),
        };

        Ok(Self {
            config,
            vectors,
            metadata,
            approximate: ApproximateIndex::new(),
            provider,
        })
    }

    fn pipeline(&self) -> IndexingPipeline {
        IndexingPipeline::new(
            self.vectors.clone(),
            self.metadata.clone(),
            self.provider.clone(),
            Arc::new(PlainTextExtractor::default()),
            self.approximate.clone(),
            self.config.scan.clone(),
            self.config.pipeline_config(),
        )
    }

    fn coordinator(&self) -> SearchCoordinator {
        SearchCoordinator::new(
            self.vectors.clone(),
            self.metadata.clone(),
            self.approximate.clone(),
            self.provider.clone(),
            self.config.search_config(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = AppConfig::load_or_default().await?;

    match cli.command {
        Command::Index { directory } => index(config, directory).await,
        Command::Search { query, limit } => search(config, &query, limit).await,
        Command::Status => status(config).await,
        Command::Clear => clear().await,
        Command::Watch { directories } => watch(config, directories).await,
    }
}

async fn index(config: AppConfig, directory: PathBuf) -> Result<()> {
    let directory = directory
        .canonicalize()
        .with_context(|| format!("resolving {}", directory.display()))?;

    let mut app = App::open(config).await?;
    let pipeline = app.pipeline();

    let mut progress = pipeline.subscribe_progress();
    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let status: IndexStatus = progress.borrow_and_update().clone();
            if status.is_indexing && status.total > 0 {
                log::info!(
                    "Indexing {}/{}: {}",
                    status.current,
                    status.total,
                    status.current_file
                );
            }
        }
    });

    let outcome = pipeline.index_directory(&directory).await?;
    printer.abort();

    println!(
        "Indexed {}: {} content, {} metadata-only, {} failed, {} unchanged ({} ms)",
        directory.display(),
        outcome.content_indexed,
        outcome.metadata_only,
        outcome.failed,
        outcome.skipped_unchanged,
        outcome.time_ms
    );
    for error in &outcome.errors {
        eprintln!("  error: {error}");
    }

    let dir_str = directory.to_string_lossy().to_string();
    if !app.config.watched_directories.contains(&dir_str) {
        app.config.watched_directories.push(dir_str);
        app.config.save().await?;
    }
    Ok(())
}

async fn search(config: AppConfig, raw_query: &str, limit: Option<usize>) -> Result<()> {
    let limit = limit.unwrap_or(config.max_search_results).min(200);
    let app = App::open(config).await?;
    let coordinator = app.coordinator();

    let parsed = QueryParser::new().parse(raw_query);
    let query = if parsed.query.is_empty() {
        raw_query
    } else {
        parsed.query.as_str()
    };

    let hits = coordinator.query(query, limit, &parsed.filters).await?;
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{:>3}. {:.3}  {}  (similarity {:.3}, lexical {:.3})",
            rank + 1,
            hit.final_score,
            hit.file_path,
            hit.similarity,
            hit.lexical_score
        );
    }
    Ok(())
}

async fn status(config: AppConfig) -> Result<()> {
    let app = App::open(config).await?;
    let counts = app.metadata.count_by_state().await?;
    let count_of = |state: IndexingState| counts.get(&state).copied().unwrap_or(0);

    println!("Files:         {}", app.metadata.count().await?);
    println!("  content:       {}", count_of(IndexingState::ContentIndexed));
    println!("  metadata-only: {}", count_of(IndexingState::MetadataOnly));
    println!("  failed:        {}", count_of(IndexingState::Failed));
    println!("  pending:       {}", count_of(IndexingState::Pending));
    println!("Vectors:       {}", app.vectors.len());
    println!("Tombstones:    {:.1}%", app.vectors.tombstone_ratio() * 100.0);
    println!("Watched:       {:?}", app.config.watched_directories);
    Ok(())
}

async fn clear() -> Result<()> {
    let data_dir = AppConfig::data_dir();
    for name in ["vectors.bin", "metadata.db"] {
        let path = data_dir.join(name);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("removing {}", path.display()))?;
        }
    }
    println!("Index cleared.");
    Ok(())
}

async fn watch(config: AppConfig, extra: Vec<PathBuf>) -> Result<()> {
    let mut directories: Vec<PathBuf> = config
        .watched_directories
        .iter()
        .map(PathBuf::from)
        .collect();
    directories.extend(extra);
    directories.retain(|dir| {
        let ok = dir.is_dir();
        if !ok {
            log::warn!("Skipping missing watch directory {}", dir.display());
        }
        ok
    });
    if directories.is_empty() {
        anyhow::bail!("nothing to watch; run `semfind index <dir>` first or pass directories");
    }

    let app = App::open(config).await?;
    let pipeline = app.pipeline();

    // Catch up on changes that happened while we were not running.
    for dir in &directories {
        let outcome = pipeline.index_directory(dir).await?;
        log::info!(
            "Startup scan of {}: {} content, {} metadata-only, {} unchanged",
            dir.display(),
            outcome.content_indexed,
            outcome.metadata_only,
            outcome.skipped_unchanged
        );
    }

    let (tx, rx) = ChangeWatcher::channel();
    let _watcher = ChangeWatcher::start(&directories, tx)?;
    println!("Watching {} directories; Ctrl-C to stop.", directories.len());

    let loop_pipeline = pipeline.clone();
    let event_loop = tokio::spawn(drive_pipeline(
        loop_pipeline,
        rx,
        WatcherConfig::default(),
    ));

    tokio::signal::ctrl_c().await?;
    event_loop.abort();
    println!("Stopped.");
    Ok(())
}

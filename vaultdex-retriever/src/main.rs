use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use vaultdex_embed::{EmbeddingProvider, ProviderKind, create_provider};
use vaultdex_retriever::{
    config::VaultdexConfig,
    retrieval::{
        change_detector::ChangeSet,
        orchestrator::{BatchOrchestrator, IndexPlanner, IndexRunResult},
        revision::{GitRevisionControl, RevisionControl},
    },
    status::gather_status,
    storage::{
        QueryFilter, QueryHit, QueryInput, QueryOptions, SqliteVectorStore, VectorStore,
        sqlite_store::DB_FILE_NAME,
    },
    watch::watch_vault,
};

/// Incrementally index a Markdown vault for semantic search.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Vault root directory.
    #[arg(short, long, global = true, default_value = ".")]
    vault: PathBuf,

    /// Configuration file. Defaults to vaultdex.toml in the vault root when present.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the database and version file, overriding the configuration.
    #[arg(long, global = true)]
    db_dir: Option<PathBuf>,

    /// Embedding provider, overriding the configuration (fastembed or hashing).
    #[arg(long, global = true)]
    provider: Option<ProviderKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index notes that changed since the last run.
    Index {
        /// Report what would change without touching the index or version file.
        #[arg(long)]
        dry_run: bool,
        /// Reindex every note regardless of the previous run.
        #[arg(long)]
        full: bool,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        concurrency: Option<usize>,
        /// Compare content hashes only, ignoring git history.
        #[arg(long)]
        no_git: bool,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show the state of the index and pending changes.
    Status {
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Search indexed chunks.
    Search {
        query: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Only chunks tagged with this tag or one of its descendants.
        #[arg(long)]
        tag: Option<String>,
        /// Only notes under this vault-relative path prefix.
        #[arg(long)]
        path: Option<String>,
        /// Substring search instead of embedding similarity.
        #[arg(long)]
        text: bool,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Index, then keep reindexing as notes change.
    Watch {
        #[arg(long, default_value_t = 5)]
        debounce_secs: u64,
        #[arg(long)]
        no_git: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct DryRunReport<'a> {
    dry_run: bool,
    changes: &'a ChangeSet,
    to_index: Vec<String>,
    to_remove: Vec<String>,
    skipped_files: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let vault = args.vault.clone();

    let mut config = match &args.config {
        Some(path) => VaultdexConfig::load(path).await?,
        None => VaultdexConfig::discover(&vault).await?,
    };
    if let Some(dir) = &args.db_dir {
        config.store.database_dir = Some(dir.clone());
    }
    if let Some(provider) = args.provider {
        config.embedding.provider = provider;
    }

    match args.command {
        Commands::Index {
            dry_run,
            full,
            batch_size,
            concurrency,
            no_git,
            format,
        } => {
            config.indexing.dry_run |= dry_run;
            config.indexing.force_full |= full;
            if let Some(size) = batch_size {
                config.indexing.batch_size = size;
            }
            if let Some(n) = concurrency {
                config.indexing.concurrency = n;
            }
            if no_git {
                config.indexing.use_revision_control = false;
            }
            config.validate()?;

            if config.indexing.dry_run {
                let mut planner = IndexPlanner::new(&config, &vault)?;
                if let Some(vcs) = revision_control(&config) {
                    planner = planner.with_revision_control(vcs);
                }
                let plan = planner.plan().await?;
                let report = DryRunReport {
                    dry_run: true,
                    changes: &plan.changes,
                    to_index: plan.changes.paths_to_index(),
                    to_remove: plan.changes.paths_to_remove(),
                    skipped_files: plan.snapshot.skipped.len(),
                };
                print_dry_run(&report, &format)?;
                return Ok(());
            }

            let orchestrator = build_orchestrator(&config, &vault).await?;
            let cancel = cancel_on_ctrl_c();
            let result = orchestrator.run(&cancel).await?;
            print_run_result(&result, &format)?;
            Ok(())
        }
        Commands::Status { format } => {
            config.validate()?;
            let planner = IndexPlanner::new(&config, &vault)?;
            let db_dir = config.database_dir(&vault);
            let store = if tokio::fs::try_exists(db_dir.join(DB_FILE_NAME)).await? {
                Some(SqliteVectorStore::open(&db_dir).await?)
            } else {
                None
            };
            let status = gather_status(
                &vault,
                &planner,
                store.as_ref().map(|s| s as &dyn VectorStore),
            )
            .await?;

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
                OutputFormat::Summary => {
                    println!("Vault: {}", status.vault_root);
                    match &status.version {
                        Some(version) => {
                            println!(
                                "Last indexed: {} ({} documents, {} chunks)",
                                version.indexed_at.to_rfc3339(),
                                version.total_documents,
                                version.total_chunks
                            );
                            println!(
                                "Revision: {}",
                                version.last_indexed_revision.as_deref().unwrap_or("none")
                            );
                        }
                        None => println!("Not indexed yet ({} missing)", status.version_file),
                    }
                    if let Some(stats) = &status.store {
                        println!(
                            "Store: {} vectors from {} notes, dimension {}",
                            stats.total_vectors,
                            stats.total_sources,
                            stats.dimension.map_or("-".to_string(), |d| d.to_string())
                        );
                    }
                    let pending = status.pending_changes;
                    println!(
                        "Pending: {} added, {} modified, {} deleted, {} renamed",
                        pending.added, pending.modified, pending.deleted, pending.renamed
                    );
                    if status.is_up_to_date() {
                        println!("Index is up to date");
                    }
                }
            }
            Ok(())
        }
        Commands::Search {
            query,
            limit,
            tag,
            path,
            text,
            format,
        } => {
            config.validate()?;
            let db_dir = config.database_dir(&vault);
            if !tokio::fs::try_exists(db_dir.join(DB_FILE_NAME)).await? {
                anyhow::bail!("no index found in {}, run `vaultdex index` first", db_dir.display());
            }
            let store = SqliteVectorStore::open(&db_dir).await?;
            let input = if text {
                QueryInput::Text(query)
            } else {
                let embedder = create_provider(&config.embedding).await?;
                QueryInput::Vector(embedder.embed_text(&query).await?)
            };
            let options = QueryOptions {
                limit,
                filter: QueryFilter {
                    source_prefix: path,
                    tag,
                },
            };
            let hits = store.query(&input, &options).await?;
            print_hits(&hits, &format)?;
            Ok(())
        }
        Commands::Watch {
            debounce_secs,
            no_git,
        } => {
            if no_git {
                config.indexing.use_revision_control = false;
            }
            config.validate()?;
            let orchestrator = build_orchestrator(&config, &vault).await?;
            let cancel = cancel_on_ctrl_c();
            watch_vault(&orchestrator, Duration::from_secs(debounce_secs.max(1)), &cancel).await
        }
    }
}

fn revision_control(config: &VaultdexConfig) -> Option<Arc<dyn RevisionControl>> {
    config
        .indexing
        .use_revision_control
        .then(|| Arc::new(GitRevisionControl::new()) as Arc<dyn RevisionControl>)
}

async fn build_orchestrator(config: &VaultdexConfig, vault: &Path) -> anyhow::Result<BatchOrchestrator> {
    let db_dir = config.database_dir(vault);
    tokio::fs::create_dir_all(&db_dir).await?;
    let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open(&db_dir).await?);
    let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding).await?);
    tracing::info!(
        "Using {} embeddings ({} dimensions)",
        embedder.provider_name(),
        embedder.embedding_dimension()
    );

    let mut orchestrator = BatchOrchestrator::new(config, vault, store, embedder)?;
    if let Some(vcs) = revision_control(config) {
        orchestrator = orchestrator.with_revision_control(vcs);
    }
    Ok(orchestrator)
}

/// Cancels between batches on Ctrl-C so completed work is still recorded.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing the current batch");
            token.cancel();
        }
    });
    cancel
}

fn print_dry_run(report: &DryRunReport<'_>, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Summary => {
            let summary = report.changes.summary();
            println!(
                "Dry run: {} added, {} modified, {} deleted, {} renamed",
                summary.added, summary.modified, summary.deleted, summary.renamed
            );
            for path in &report.to_index {
                println!("  index  {path}");
            }
            for path in &report.to_remove {
                println!("  remove {path}");
            }
        }
    }
    Ok(())
}

fn print_run_result(result: &IndexRunResult, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(result)?),
        OutputFormat::Summary => {
            let summary = result.changes_summary;
            println!(
                "Changes: {} added, {} modified, {} deleted, {} renamed",
                summary.added, summary.modified, summary.deleted, summary.renamed
            );
            println!(
                "Processed {} of {} files ({} chunks written, {} removed) in {}ms",
                result.processed_count,
                result.attempted_count,
                result.chunks_written,
                result.chunks_removed,
                result.duration_ms
            );
            if result.cancelled_files > 0 {
                println!("Cancelled before {} files", result.cancelled_files);
            }
            if !result.errors.is_empty() {
                println!("Errors:");
                for error in &result.errors {
                    println!("  {}: {}", error.file, error.reason);
                }
            }
        }
    }
    Ok(())
}

fn print_hits(hits: &[QueryHit], format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(hits)?),
        OutputFormat::Summary => {
            if hits.is_empty() {
                println!("No results");
            }
            for hit in hits {
                let m = &hit.metadata;
                let heading = if m.header_path.is_empty() {
                    String::new()
                } else {
                    format!(" > {}", m.header_path.join(" > "))
                };
                println!(
                    "{:.3}  {}{} [{}/{}]",
                    hit.score,
                    m.source_file,
                    heading,
                    m.chunk_index + 1,
                    m.total_chunks
                );
                let preview: String = m.text.chars().take(160).collect();
                println!("       {}", preview.replace('\n', " "));
            }
        }
    }
    Ok(())
}

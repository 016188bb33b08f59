//! Batch orchestration of an indexing run.
//!
//! A run moves through [`RunState`]s:
//!
//! ```text
//! Idle → DetectingChanges → NoChanges → Done
//!                         ↘ ProcessingChanges → [PartiallyFailed] → PersistingVersion → Done
//! ```
//!
//! Changed files are split into fixed-size batches. Batches run one after another;
//! within a batch up to `concurrency` file pipelines (read → extract → chunk →
//! embed → upsert) run at once. A failing file is recorded in
//! [`IndexRunResult::errors`] and never stops its siblings. Cancellation is checked
//! between batches only, so no file is left half written.
//!
//! The version record is written once at the end, describing exactly the files that
//! were indexed. Failing to write it fails the run.

use super::change_detector::{ChangeDetector, ChangeSet, ChangesSummary};
use super::chunking_strategy::DocumentChunker;
use super::discovery::{FileDiscovery, FileSnapshot, content_hash};
use super::revision::RevisionControl;
use super::version_store::{VersionRecord, VersionStore};
use crate::config::{IndexingOptions, VaultdexConfig};
use crate::error::{FileError, IndexError, Result};
use crate::storage::VectorStore;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vaultdex_embed::{EmbedError, EmbeddingProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    DetectingChanges,
    NoChanges,
    ProcessingChanges,
    PartiallyFailed,
    PersistingVersion,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::DetectingChanges => "detecting changes",
            Self::NoChanges => "no changes",
            Self::ProcessingChanges => "processing changes",
            Self::PartiallyFailed => "partially failed",
            Self::PersistingVersion => "persisting version",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Live counters, readable while a run is in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunProgress {
    pub files_total: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub batches_total: usize,
    pub batches_completed: usize,
    pub chunks_written: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexRunResult {
    /// Files indexed or removed successfully.
    pub processed_count: usize,
    /// Files the run started work on.
    pub attempted_count: usize,
    pub errors: Vec<FileError>,
    pub changes_summary: ChangesSummary,
    pub changes: ChangeSet,
    pub chunks_written: usize,
    pub chunks_removed: usize,
    /// Entries discovery passed over, such as oversized files.
    pub skipped_files: usize,
    /// Files left unprocessed because the run was cancelled.
    pub cancelled_files: usize,
    pub dry_run: bool,
    pub final_state: RunState,
    pub duration_ms: u64,
}

impl IndexRunResult {
    fn unprocessed(plan: &IndexPlan, dry_run: bool, final_state: RunState, started: Instant) -> Self {
        Self {
            processed_count: 0,
            attempted_count: 0,
            errors: Vec::new(),
            changes_summary: plan.changes.summary(),
            changes: plan.changes.clone(),
            chunks_written: 0,
            chunks_removed: 0,
            skipped_files: plan.snapshot.skipped.len(),
            cancelled_files: 0,
            dry_run,
            final_state,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.cancelled_files == 0
    }
}

/// What a run would do: the scanned vault, the prior record and the detected changes.
#[derive(Debug, Clone)]
pub struct IndexPlan {
    pub snapshot: FileSnapshot,
    pub prior: Option<VersionRecord>,
    pub changes: ChangeSet,
}

/// Discovery, version lookup and change detection, with no side effects.
pub struct IndexPlanner {
    discovery: FileDiscovery,
    version_store: VersionStore,
    detector: ChangeDetector,
    root: PathBuf,
    force_full: bool,
}

impl IndexPlanner {
    pub fn new(config: &VaultdexConfig, root: impl Into<PathBuf>) -> Result<Self> {
        config.validate()?;
        let root = root.into();
        Ok(Self {
            discovery: FileDiscovery::new(&root, config.discovery.clone())?,
            version_store: VersionStore::new(config.database_dir(&root)),
            detector: ChangeDetector::new(&root),
            force_full: config.indexing.force_full,
            root,
        })
    }

    pub fn with_revision_control(mut self, revision_control: Arc<dyn RevisionControl>) -> Self {
        self.detector = ChangeDetector::new(&self.root).with_revision_control(revision_control);
        self
    }

    pub fn version_store(&self) -> &VersionStore {
        &self.version_store
    }

    pub async fn plan(&self) -> Result<IndexPlan> {
        let snapshot = self.discovery.scan().await?;
        let prior = self.version_store.load().await;
        let changes = if self.force_full {
            info!("Full reindex requested");
            let state = self.detector.revision_state().await;
            ChangeSet::full_reindex(&snapshot, prior.as_ref(), state)
        } else {
            self.detector.detect(&snapshot, prior.as_ref()).await
        };
        Ok(IndexPlan {
            snapshot,
            prior,
            changes,
        })
    }
}

struct FileOutcome {
    path: String,
    content_hash: String,
    chunks_written: usize,
    chunks_removed: usize,
}

pub struct BatchOrchestrator {
    planner: IndexPlanner,
    root: PathBuf,
    options: IndexingOptions,
    chunker: DocumentChunker,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    state: RwLock<RunState>,
    progress: RwLock<RunProgress>,
}

impl BatchOrchestrator {
    pub fn new(
        config: &VaultdexConfig,
        root: impl Into<PathBuf>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let root = root.into();
        Ok(Self {
            planner: IndexPlanner::new(config, &root)?,
            root,
            options: config.indexing.clone(),
            chunker: DocumentChunker::new(config.chunking.clone()),
            store,
            embedder,
            state: RwLock::new(RunState::Idle),
            progress: RwLock::new(RunProgress::default()),
        })
    }

    pub fn with_revision_control(mut self, revision_control: Arc<dyn RevisionControl>) -> Self {
        self.planner = self.planner.with_revision_control(revision_control);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn state(&self) -> RunState {
        *self.state.read().await
    }

    pub async fn progress(&self) -> RunProgress {
        self.progress.read().await.clone()
    }

    async fn set_state(&self, state: RunState) {
        debug!("Run state: {}", state);
        *self.state.write().await = state;
    }

    /// Runs one indexing pass. Only discovery and version-record failures return
    /// `Err`; per-file problems are reported in the result.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<IndexRunResult> {
        let started = Instant::now();
        *self.progress.write().await = RunProgress::default();
        self.set_state(RunState::DetectingChanges).await;

        let plan = match self.planner.plan().await {
            Ok(plan) => plan,
            Err(e) => {
                error!("Indexing aborted: {}", e);
                self.set_state(RunState::Failed).await;
                return Err(e);
            }
        };

        if self.options.dry_run {
            info!(
                "Dry run: would index {} files and remove {}",
                plan.changes.paths_to_index().len(),
                plan.changes.paths_to_remove().len()
            );
            self.set_state(RunState::Done).await;
            return Ok(IndexRunResult::unprocessed(&plan, true, RunState::Done, started));
        }

        if plan.changes.is_empty() {
            info!("No changes since last index");
            self.set_state(RunState::NoChanges).await;
            self.set_state(RunState::Done).await;
            return Ok(IndexRunResult::unprocessed(&plan, false, RunState::Done, started));
        }

        self.set_state(RunState::ProcessingChanges).await;
        let mut result = IndexRunResult::unprocessed(&plan, false, RunState::Done, started);
        let mut removed_paths = BTreeSet::new();

        for path in plan.changes.paths_to_remove() {
            result.attempted_count += 1;
            match self.store.delete_by_source(&path).await {
                Ok(removed) => {
                    result.chunks_removed += removed;
                    result.processed_count += 1;
                    removed_paths.insert(path);
                }
                Err(e) => {
                    let err = IndexError::storage(&path, e);
                    warn!("{}", err);
                    result.errors.push(FileError::new(&path, &err));
                }
            }
        }

        let to_index = plan.changes.paths_to_index();
        let batch_size = self.options.batch_size.max(1);
        let batches: Vec<&[String]> = to_index.chunks(batch_size).collect();
        {
            let mut progress = self.progress.write().await;
            progress.files_total = to_index.len();
            progress.batches_total = batches.len();
        }

        let mut outcomes = Vec::new();
        for (batch_number, batch) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                let remaining: usize = batches[batch_number..].iter().map(|b| b.len()).sum();
                warn!(
                    "Run cancelled, skipping {} remaining batches ({} files)",
                    batches.len() - batch_number,
                    remaining
                );
                result.cancelled_files = remaining;
                break;
            }

            info!(
                "Processing batch {}/{} ({} files)",
                batch_number + 1,
                batches.len(),
                batch.len()
            );
            result.attempted_count += batch.len();
            let batch_results: Vec<std::result::Result<FileOutcome, (String, IndexError)>> =
                stream::iter(batch.iter())
                    .map(|path| self.process_file(path))
                    .buffer_unordered(self.options.concurrency.max(1))
                    .collect()
                    .await;

            for file_result in batch_results {
                match file_result {
                    Ok(outcome) => outcomes.push(outcome),
                    Err((path, err)) => result.errors.push(FileError::new(path, &err)),
                }
            }
            self.progress.write().await.batches_completed += 1;
        }

        if !result.errors.is_empty() {
            warn!("{} files failed during this run", result.errors.len());
            self.set_state(RunState::PartiallyFailed).await;
        }

        let mut file_hashes = plan
            .prior
            .as_ref()
            .map(|r| r.file_hashes.clone())
            .unwrap_or_default();
        for path in &removed_paths {
            file_hashes.remove(path);
        }
        for outcome in &outcomes {
            result.chunks_written += outcome.chunks_written;
            result.chunks_removed += outcome.chunks_removed;
            file_hashes.insert(outcome.path.clone(), outcome.content_hash.clone());
        }
        result.processed_count += outcomes.len();

        let total_chunks = match self.store.get_stats().await {
            Ok(stats) => stats.total_vectors,
            Err(e) => {
                warn!("Cannot count stored chunks, estimating from this run: {}", e);
                let prior_chunks = plan.prior.as_ref().map_or(0, |r| r.total_chunks);
                (prior_chunks + result.chunks_written).saturating_sub(result.chunks_removed)
            }
        };
        // A dirty tree or an incomplete run is not described by any revision.
        let revision = if result.is_success() {
            plan.changes.indexed_revision().map(String::from)
        } else {
            None
        };
        let record = VersionRecord::new(revision, file_hashes, total_chunks);

        let final_state = if result.errors.is_empty() {
            RunState::Done
        } else {
            RunState::PartiallyFailed
        };
        self.set_state(RunState::PersistingVersion).await;
        if let Err(e) = self.planner.version_store().save(&record).await {
            error!("Indexed {} files but {}", result.processed_count, e);
            self.set_state(RunState::Failed).await;
            return Err(e);
        }
        self.set_state(final_state).await;

        result.final_state = final_state;
        result.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Indexed {} of {} files ({} chunks written, {} removed, {} errors) in {}ms",
            result.processed_count,
            result.attempted_count,
            result.chunks_written,
            result.chunks_removed,
            result.errors.len(),
            result.duration_ms
        );
        Ok(result)
    }

    async fn process_file(&self, path: &str) -> std::result::Result<FileOutcome, (String, IndexError)> {
        let outcome = self.index_file(path).await;
        let mut progress = self.progress.write().await;
        match outcome {
            Ok(outcome) => {
                progress.files_processed += 1;
                progress.chunks_written += outcome.chunks_written;
                Ok(outcome)
            }
            Err(err) => {
                warn!("Failed to index {}: {}", path, err);
                progress.files_failed += 1;
                Err((path.to_string(), err))
            }
        }
    }

    async fn index_file(&self, path: &str) -> Result<FileOutcome> {
        let bytes = tokio::fs::read(self.root.join(path))
            .await
            .map_err(|source| IndexError::Read {
                path: path.to_string(),
                source,
            })?;
        let hash = content_hash(&bytes);
        let text = String::from_utf8(bytes).map_err(|e| IndexError::Chunking {
            path: path.to_string(),
            reason: format!("not valid UTF-8: {e}"),
        })?;

        let mut chunks = self.chunker.chunk_document(path, &text);
        if !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let embedded = self
                .embedder
                .embed_texts(&texts)
                .await
                .map_err(|source| IndexError::Embedding {
                    path: path.to_string(),
                    source,
                })?;
            if embedded.embeddings.len() != chunks.len() {
                return Err(IndexError::Embedding {
                    path: path.to_string(),
                    source: EmbedError::embedding_gen(format!(
                        "expected {} embeddings, got {}",
                        chunks.len(),
                        embedded.embeddings.len()
                    )),
                });
            }
            for (chunk, embedding) in chunks.iter_mut().zip(embedded.embeddings) {
                chunk.embedding = Some(embedding);
            }
        }

        // Clears chunks beyond the new count when a file shrinks.
        let chunks_removed = self
            .store
            .delete_by_source(path)
            .await
            .map_err(|e| IndexError::storage(path, e))?;
        for chunk in &chunks {
            let Some(embedding) = &chunk.embedding else {
                continue;
            };
            self.store
                .upsert(&chunk.id(), embedding, &chunk.metadata(&hash))
                .await
                .map_err(|e| IndexError::storage(path, e))?;
        }

        debug!("Indexed {} ({} chunks)", path, chunks.len());
        Ok(FileOutcome {
            path: path.to_string(),
            content_hash: hash,
            chunks_written: chunks.len(),
            chunks_removed,
        })
    }
}

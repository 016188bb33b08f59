//! Continuous reindexing on file changes.
//!
//! Filesystem events are debounced, then each burst triggers one incremental run.
//! Change detection works out what actually changed, so events only decide *when*
//! to run, never *what* to index.

use crate::retrieval::orchestrator::BatchOrchestrator;
use anyhow::Result;
use notify::Watcher;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Files written by the indexer itself; watching them would retrigger forever.
fn is_index_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(".vaultdex"))
}

/// Indexes once, then again after every debounced burst of changes, until `cancel` fires.
pub async fn watch_vault(
    orchestrator: &BatchOrchestrator,
    debounce: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let root = orchestrator.root().to_path_buf();
    let (events_tx, mut events_rx) = mpsc::channel::<PathBuf>(128);

    let mut event_watcher = notify_debouncer_mini::new_debouncer(
        debounce,
        move |res: notify_debouncer_mini::DebounceEventResult| {
            for ev in res.ok().into_iter().flatten() {
                if is_index_artifact(&ev.path) {
                    continue;
                }
                // Runs on the debouncer's own thread, so blocking is fine. A closed
                // channel means the watch loop has ended.
                if events_tx.blocking_send(ev.path).is_err() {
                    return;
                }
            }
        },
    )?;
    event_watcher
        .watcher()
        .watch(&root, notify::RecursiveMode::Recursive)?;
    info!("Watching {} for changes", root.display());

    run_once(orchestrator, cancel).await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events_rx.recv() => {
                let Some(path) = event else { break };
                let mut changed = 1;
                while events_rx.try_recv().is_ok() {
                    changed += 1;
                }
                debug!("{} filesystem events, first at {}", changed, path.display());
                run_once(orchestrator, cancel).await;
            }
        }
    }

    info!("Stopped watching {}", root.display());
    Ok(())
}

async fn run_once(orchestrator: &BatchOrchestrator, cancel: &CancellationToken) {
    match orchestrator.run(cancel).await {
        Ok(result) if result.changes.is_empty() => debug!("Vault unchanged"),
        Ok(result) => info!(
            "Reindexed: {} added, {} modified, {} deleted, {} renamed, {} errors",
            result.changes_summary.added,
            result.changes_summary.modified,
            result.changes_summary.deleted,
            result.changes_summary.renamed,
            result.errors.len()
        ),
        Err(e) => error!("Indexing run failed: {}", e),
    }
}

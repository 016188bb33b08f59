//! Read-only inspection of a vault's index, backing `vaultdex status`.

use crate::retrieval::change_detector::ChangesSummary;
use crate::retrieval::orchestrator::IndexPlanner;
use crate::storage::{StoreStats, VectorStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct VersionSummary {
    pub schema_version: u32,
    pub last_indexed_revision: Option<String>,
    pub indexed_at: DateTime<Utc>,
    pub total_documents: usize,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub vault_root: String,
    pub version_file: String,
    pub version_file_exists: bool,
    /// `None` when the file is missing or unreadable.
    pub version: Option<VersionSummary>,
    pub database_exists: bool,
    pub store: Option<StoreStats>,
    pub indices: Vec<String>,
    /// What the next `vaultdex index` would do.
    pub pending_changes: ChangesSummary,
    pub skipped_files: usize,
}

impl IndexStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.version.is_some() && self.pending_changes == ChangesSummary::default()
    }
}

/// Collects status without writing anything. `store` is `None` when no database has
/// been created yet.
pub async fn gather_status(
    vault_root: &Path,
    planner: &IndexPlanner,
    store: Option<&dyn VectorStore>,
) -> Result<IndexStatus> {
    let version_store = planner.version_store();
    let plan = planner.plan().await?;

    let (database_exists, stats, indices) = match store {
        Some(store) if store.database_exists().await? => {
            (true, Some(store.get_stats().await?), store.list_indices().await?)
        }
        _ => (false, None, Vec::new()),
    };

    Ok(IndexStatus {
        vault_root: vault_root.display().to_string(),
        version_file: version_store.path().display().to_string(),
        version_file_exists: version_store.exists().await,
        version: plan.prior.as_ref().map(|record| VersionSummary {
            schema_version: record.schema_version,
            last_indexed_revision: record.last_indexed_revision.clone(),
            indexed_at: record.indexed_at,
            total_documents: record.total_documents,
            total_chunks: record.total_chunks,
        }),
        database_exists,
        store: stats,
        indices,
        pending_changes: plan.changes.summary(),
        skipped_files: plan.snapshot.skipped.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultdexConfig;
    use crate::retrieval::orchestrator::BatchOrchestrator;
    use crate::storage::SqliteVectorStore;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use vaultdex_embed::HashingProvider;

    #[tokio::test]
    async fn test_status_before_and_after_indexing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a.md"), "# A\n\nalpha #tag")?;
        std::fs::write(dir.path().join("b.md"), "beta")?;
        let config = VaultdexConfig::default();
        let planner = IndexPlanner::new(&config, dir.path())?;

        let status = gather_status(dir.path(), &planner, None).await?;
        assert!(!status.version_file_exists);
        assert!(!status.database_exists);
        assert_eq!(status.pending_changes.added, 2);
        assert!(!status.is_up_to_date());

        let store = Arc::new(SqliteVectorStore::open_memory().await?);
        let orchestrator = BatchOrchestrator::new(
            &config,
            dir.path(),
            store.clone(),
            Arc::new(HashingProvider::initialized(16)?),
        )?;
        orchestrator.run(&CancellationToken::new()).await?;

        let dyn_store: &dyn VectorStore = &*store;
        let status = gather_status(dir.path(), &planner, Some(dyn_store)).await?;
        assert!(status.version_file_exists);
        assert!(status.database_exists);
        assert!(status.is_up_to_date());
        let version = status.version.unwrap();
        assert_eq!(version.total_documents, 2);
        assert_eq!(version.total_chunks, 2);
        assert_eq!(status.store.unwrap().total_vectors, 2);
        assert_eq!(status.indices, vec!["chunks"]);

        std::fs::write(dir.path().join("b.md"), "beta, edited")?;
        let status = gather_status(dir.path(), &planner, Some(dyn_store)).await?;
        assert_eq!(status.pending_changes.modified, 1);
        Ok(())
    }
}

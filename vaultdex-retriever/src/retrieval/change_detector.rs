//! Classifies what changed in the vault since the last recorded run.
//!
//! Detection prefers git history when the vault is a repository and the prior
//! record names a revision. History only nominates candidate paths: each one is
//! still classified by comparing content hashes, so a touched-but-identical file is
//! never reindexed. When history is unusable the detector compares every path's
//! hash instead. Detection never fails; facade errors are logged and degrade to the
//! hash comparison.

use super::discovery::FileSnapshot;
use super::revision::{RevisionControl, RevisionError};
use super::version_store::VersionRecord;
use crate::error::IndexError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

/// How a [`ChangeSet`] was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    /// No usable prior record.
    FirstRun,
    /// Caller asked for a full reindex.
    ForcedFull,
    /// Clean working tree at the recorded revision.
    Unchanged,
    RevisionHistory,
    ContentHash,
}

/// Changed paths by category. A path appears in at most one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub renamed: Vec<Rename>,
    pub needs_full_reindex: bool,
    pub strategy: DetectionStrategy,
    /// Revision the vault is at now, when it is a repository.
    pub current_revision: Option<String>,
    /// No uncommitted changes under the vault at detection time, so
    /// `current_revision` alone describes the detected content.
    pub working_tree_clean: bool,
}

/// Where the vault stands in revision control.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionState {
    pub revision: Option<String>,
    /// False when unknown.
    pub clean: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangesSummary {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub renamed: usize,
}

impl ChangeSet {
    fn empty(strategy: DetectionStrategy, state: RevisionState) -> Self {
        Self {
            added: Vec::new(),
            modified: Vec::new(),
            deleted: Vec::new(),
            renamed: Vec::new(),
            needs_full_reindex: false,
            strategy,
            working_tree_clean: state.revision.is_some() && state.clean,
            current_revision: state.revision,
        }
    }

    /// The revision a successful run may record: only a clean working tree is
    /// fully described by its revision.
    pub fn indexed_revision(&self) -> Option<&str> {
        if self.working_tree_clean {
            self.current_revision.as_deref()
        } else {
            None
        }
    }

    /// Every current file marked for indexing and every vanished file for removal.
    pub fn full_reindex(
        snapshot: &FileSnapshot,
        prior: Option<&VersionRecord>,
        state: RevisionState,
    ) -> Self {
        let current = snapshot.hashes();
        let mut set = Self::empty(
            if prior.is_some() {
                DetectionStrategy::ForcedFull
            } else {
                DetectionStrategy::FirstRun
            },
            state,
        );
        set.needs_full_reindex = true;
        for path in current.keys() {
            match prior {
                Some(record) if record.file_hashes.contains_key(path) => {
                    set.modified.push(path.clone())
                }
                _ => set.added.push(path.clone()),
            }
        }
        if let Some(record) = prior {
            set.deleted = record
                .file_hashes
                .keys()
                .filter(|path| !current.contains_key(*path))
                .cloned()
                .collect();
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
    }

    pub fn summary(&self) -> ChangesSummary {
        ChangesSummary {
            added: self.added.len(),
            modified: self.modified.len(),
            deleted: self.deleted.len(),
            renamed: self.renamed.len(),
        }
    }

    /// Paths whose chunks must be (re)written, sorted.
    pub fn paths_to_index(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .added
            .iter()
            .chain(&self.modified)
            .cloned()
            .chain(self.renamed.iter().map(|r| r.to.clone()))
            .collect();
        paths.sort();
        paths
    }

    /// Paths whose chunks must be dropped without replacement, sorted.
    pub fn paths_to_remove(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .deleted
            .iter()
            .cloned()
            .chain(self.renamed.iter().map(|r| r.from.clone()))
            .collect();
        paths.sort();
        paths
    }
}

pub struct ChangeDetector {
    root: PathBuf,
    revision_control: Option<Arc<dyn RevisionControl>>,
}

impl ChangeDetector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            revision_control: None,
        }
    }

    pub fn with_revision_control(mut self, revision_control: Arc<dyn RevisionControl>) -> Self {
        self.revision_control = Some(revision_control);
        self
    }

    pub async fn detect(&self, snapshot: &FileSnapshot, prior: Option<&VersionRecord>) -> ChangeSet {
        let state = self.revision_state().await;

        let Some(prior) = prior else {
            info!("No prior version record, indexing all {} files", snapshot.paths().len());
            return ChangeSet::full_reindex(snapshot, None, state);
        };

        let current = snapshot.hashes();
        if let (Some(vcs), Some(now), Some(then)) = (
            &self.revision_control,
            state.revision.as_deref(),
            prior.last_indexed_revision.as_deref(),
        ) {
            match self
                .history_candidates(vcs.as_ref(), &current, prior, then, now, state.clean)
                .await
            {
                Ok(None) => {
                    debug!("Working tree clean at recorded revision {}", now);
                    return ChangeSet::empty(DetectionStrategy::Unchanged, state.clone());
                }
                Ok(Some(candidates)) => {
                    let set = classify(
                        candidates.iter().map(String::as_str),
                        &current,
                        &prior.file_hashes,
                        DetectionStrategy::RevisionHistory,
                        state.clone(),
                    );
                    log_change_set(&set);
                    return set;
                }
                Err(e) => warn!("{}; comparing content hashes", e),
            }
        }

        let paths: BTreeSet<&str> = current
            .keys()
            .chain(prior.file_hashes.keys())
            .map(String::as_str)
            .collect();
        let set = classify(
            paths.into_iter(),
            &current,
            &prior.file_hashes,
            DetectionStrategy::ContentHash,
            state,
        );
        log_change_set(&set);
        set
    }

    /// Current revision and working-tree cleanliness, when the vault is a
    /// repository and the facade answers.
    pub async fn revision_state(&self) -> RevisionState {
        let Some(vcs) = self.revision_control.as_ref() else {
            return RevisionState::default();
        };
        if !vcs.is_repository(&self.root).await {
            return RevisionState::default();
        }
        let revision = match vcs.current_revision(&self.root).await {
            Ok(revision) => revision,
            Err(e) => {
                warn!("Cannot determine current revision: {}", e);
                return RevisionState::default();
            }
        };
        let clean = match vcs.is_clean(&self.root).await {
            Ok(clean) => clean,
            Err(e) => {
                warn!("{}", IndexError::ChangeDetection(e.to_string()));
                false
            }
        };
        RevisionState {
            revision: Some(revision),
            clean,
        }
    }

    /// Paths that may have changed according to history and the working tree, or
    /// `None` when nothing can have changed.
    async fn history_candidates(
        &self,
        vcs: &dyn RevisionControl,
        current: &BTreeMap<String, String>,
        prior: &VersionRecord,
        then: &str,
        now: &str,
        clean: bool,
    ) -> Result<Option<BTreeSet<String>>, IndexError> {
        let detection_error = |e: RevisionError| IndexError::ChangeDetection(e.to_string());
        if clean && then == now {
            return Ok(None);
        }

        let mut candidates = BTreeSet::new();
        if then != now {
            let committed = vcs
                .changes_between(&self.root, then, now)
                .await
                .map_err(detection_error)?;
            candidates.extend(committed.into_iter().map(|c| c.path));
        }
        if !clean {
            let pending = vcs
                .uncommitted_changes(&self.root)
                .await
                .map_err(detection_error)?;
            candidates.extend(pending.into_iter().map(|c| c.path));
        }
        // Files that history cannot see, such as ones newly matched by the
        // discovery filters or ignored by git.
        candidates.extend(
            current
                .keys()
                .filter(|p| !prior.file_hashes.contains_key(*p))
                .cloned(),
        );
        candidates.extend(
            prior
                .file_hashes
                .keys()
                .filter(|p| !current.contains_key(*p))
                .cloned(),
        );
        Ok(Some(candidates))
    }
}

fn classify<'a>(
    paths: impl Iterator<Item = &'a str>,
    current: &BTreeMap<String, String>,
    prior: &BTreeMap<String, String>,
    strategy: DetectionStrategy,
    state: RevisionState,
) -> ChangeSet {
    let mut set = ChangeSet::empty(strategy, state);
    for path in paths {
        match (current.get(path), prior.get(path)) {
            (Some(_), None) => set.added.push(path.to_string()),
            (None, Some(_)) => set.deleted.push(path.to_string()),
            (Some(now), Some(then)) if now != then => set.modified.push(path.to_string()),
            _ => {}
        }
    }
    set.added.sort();
    set.modified.sort();
    set.deleted.sort();
    fold_renames(&mut set, current, prior);
    set
}

/// Pairs deleted and added paths sharing a content hash. When several paths share
/// one hash, both sides are sorted and paired in order; the surplus stays as plain
/// additions or deletions.
fn fold_renames(
    set: &mut ChangeSet,
    current: &BTreeMap<String, String>,
    prior: &BTreeMap<String, String>,
) {
    let mut deleted_by_hash: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for path in &set.deleted {
        if let Some(hash) = prior.get(path) {
            deleted_by_hash.entry(hash.as_str()).or_default().push(path.as_str());
        }
    }
    let mut added_by_hash: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for path in &set.added {
        if let Some(hash) = current.get(path) {
            added_by_hash.entry(hash.as_str()).or_default().push(path.as_str());
        }
    }

    let mut renamed = Vec::new();
    for (hash, from_paths) in &deleted_by_hash {
        if let Some(to_paths) = added_by_hash.get(hash) {
            renamed.extend(from_paths.iter().zip(to_paths).map(|(from, to)| Rename {
                from: from.to_string(),
                to: to.to_string(),
            }));
        }
    }
    if renamed.is_empty() {
        return;
    }

    let from: BTreeSet<&str> = renamed.iter().map(|r| r.from.as_str()).collect();
    let to: BTreeSet<&str> = renamed.iter().map(|r| r.to.as_str()).collect();
    let deleted = set
        .deleted
        .iter()
        .filter(|p| !from.contains(p.as_str()))
        .cloned()
        .collect();
    let added = set
        .added
        .iter()
        .filter(|p| !to.contains(p.as_str()))
        .cloned()
        .collect();
    set.deleted = deleted;
    set.added = added;
    renamed.sort();
    set.renamed = renamed;
}

fn log_change_set(set: &ChangeSet) {
    info!(
        "Detected changes via {:?}: {} added, {} modified, {} deleted, {} renamed",
        set.strategy,
        set.added.len(),
        set.modified.len(),
        set.deleted.len(),
        set.renamed.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::discovery::FileRecord;
    use crate::retrieval::revision::{FileStatus, PathChange, RevisionError, RevisionResult};
    use async_trait::async_trait;
    use std::path::Path;

    fn snapshot(files: &[(&str, &str)]) -> FileSnapshot {
        let records = files
            .iter()
            .map(|(path, hash)| FileRecord {
                relative_path: path.to_string(),
                absolute_path: PathBuf::from("/vault").join(path),
                extension: "md".into(),
                size_bytes: 1,
                modified_at: None,
                content_hash: hash.to_string(),
                is_indexable: true,
            })
            .collect();
        FileSnapshot::new(records, Vec::new())
    }

    fn record(files: &[(&str, &str)], revision: Option<&str>) -> VersionRecord {
        let hashes = files
            .iter()
            .map(|(p, h)| (p.to_string(), h.to_string()))
            .collect();
        VersionRecord::new(revision.map(String::from), hashes, 0)
    }

    #[derive(Default)]
    struct MockRevisionControl {
        revision: String,
        clean: bool,
        between: Vec<PathChange>,
        uncommitted: Vec<PathChange>,
        fail_history: bool,
    }

    #[async_trait]
    impl RevisionControl for MockRevisionControl {
        async fn is_repository(&self, _path: &Path) -> bool {
            true
        }

        async fn current_revision(&self, _path: &Path) -> RevisionResult<String> {
            Ok(self.revision.clone())
        }

        async fn is_clean(&self, _path: &Path) -> RevisionResult<bool> {
            Ok(self.clean)
        }

        async fn changes_between(
            &self,
            _path: &Path,
            _from: &str,
            _to: &str,
        ) -> RevisionResult<Vec<PathChange>> {
            if self.fail_history {
                return Err(RevisionError::CommandFailed {
                    command: "git diff".into(),
                    stderr: "bad revision".into(),
                });
            }
            Ok(self.between.clone())
        }

        async fn uncommitted_changes(&self, _path: &Path) -> RevisionResult<Vec<PathChange>> {
            Ok(self.uncommitted.clone())
        }
    }

    #[tokio::test]
    async fn test_first_run_marks_everything_added() {
        let detector = ChangeDetector::new("/vault");
        let set = detector
            .detect(&snapshot(&[("a.md", "h1"), ("b.md", "h2")]), None)
            .await;
        assert_eq!(set.added, vec!["a.md", "b.md"]);
        assert!(set.needs_full_reindex);
        assert_eq!(set.strategy, DetectionStrategy::FirstRun);
        assert!(set.modified.is_empty() && set.deleted.is_empty() && set.renamed.is_empty());
    }

    #[tokio::test]
    async fn test_hash_comparison_scenario() {
        let detector = ChangeDetector::new("/vault");
        let prior = record(&[("a.md", "h1"), ("b.md", "h2")], None);
        let current = snapshot(&[("a.md", "h1"), ("b.md", "h9"), ("c.md", "h3")]);
        let set = detector.detect(&current, Some(&prior)).await;
        assert_eq!(set.added, vec!["c.md"]);
        assert_eq!(set.modified, vec!["b.md"]);
        assert!(set.deleted.is_empty());
        assert!(set.renamed.is_empty());
        assert!(!set.needs_full_reindex);
        assert_eq!(set.strategy, DetectionStrategy::ContentHash);
    }

    #[tokio::test]
    async fn test_unchanged_vault_is_empty() {
        let detector = ChangeDetector::new("/vault");
        let files = [("a.md", "h1"), ("b.md", "h2")];
        let set = detector
            .detect(&snapshot(&files), Some(&record(&files, None)))
            .await;
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_rename_detection() {
        let detector = ChangeDetector::new("/vault");
        let prior = record(&[("old.md", "h1"), ("keep.md", "h2")], None);
        let current = snapshot(&[("new.md", "h1"), ("keep.md", "h2")]);
        let set = detector.detect(&current, Some(&prior)).await;
        assert_eq!(
            set.renamed,
            vec![Rename {
                from: "old.md".into(),
                to: "new.md".into()
            }]
        );
        assert!(set.added.is_empty());
        assert!(set.deleted.is_empty());
        assert_eq!(set.paths_to_index(), vec!["new.md"]);
        assert_eq!(set.paths_to_remove(), vec!["old.md"]);
    }

    #[tokio::test]
    async fn test_ambiguous_renames_pair_in_sorted_order() {
        let detector = ChangeDetector::new("/vault");
        let prior = record(&[("x.md", "h"), ("a.md", "h")], None);
        let current = snapshot(&[("z.md", "h"), ("b.md", "h"), ("m.md", "h")]);
        let set = detector.detect(&current, Some(&prior)).await;
        assert_eq!(
            set.renamed,
            vec![
                Rename {
                    from: "a.md".into(),
                    to: "b.md".into()
                },
                Rename {
                    from: "x.md".into(),
                    to: "m.md".into()
                },
            ]
        );
        assert_eq!(set.added, vec!["z.md"]);
        assert!(set.deleted.is_empty());
    }

    #[tokio::test]
    async fn test_changed_content_is_not_a_rename() {
        let detector = ChangeDetector::new("/vault");
        let prior = record(&[("old.md", "h1")], None);
        let current = snapshot(&[("new.md", "h2")]);
        let set = detector.detect(&current, Some(&prior)).await;
        assert!(set.renamed.is_empty());
        assert_eq!(set.added, vec!["new.md"]);
        assert_eq!(set.deleted, vec!["old.md"]);
    }

    #[tokio::test]
    async fn test_clean_repository_at_recorded_revision_short_circuits() {
        let vcs = MockRevisionControl {
            revision: "r1".into(),
            clean: true,
            ..Default::default()
        };
        let detector = ChangeDetector::new("/vault").with_revision_control(Arc::new(vcs));
        let prior = record(&[("a.md", "h1")], Some("r1"));
        let set = detector
            .detect(&snapshot(&[("a.md", "h1")]), Some(&prior))
            .await;
        assert!(set.is_empty());
        assert_eq!(set.strategy, DetectionStrategy::Unchanged);
        assert_eq!(set.current_revision.as_deref(), Some("r1"));
        assert_eq!(set.indexed_revision(), Some("r1"));
    }

    #[tokio::test]
    async fn test_history_candidates_are_confirmed_by_hash() {
        let vcs = MockRevisionControl {
            revision: "r2".into(),
            clean: false,
            between: vec![
                PathChange::new("a.md", FileStatus::Modified),
                PathChange::new("b.md", FileStatus::Deleted),
                PathChange::new("touched.md", FileStatus::Modified),
                PathChange::new("image.png", FileStatus::Added),
            ],
            uncommitted: vec![PathChange::new("d.md", FileStatus::Added)],
            ..Default::default()
        };
        let detector = ChangeDetector::new("/vault").with_revision_control(Arc::new(vcs));
        let prior = record(
            &[("a.md", "h1"), ("b.md", "h2"), ("c.md", "h3"), ("touched.md", "h5")],
            Some("r1"),
        );
        let current = snapshot(&[
            ("a.md", "h1x"),
            ("c.md", "h3"),
            ("d.md", "h4"),
            ("touched.md", "h5"),
        ]);
        let set = detector.detect(&current, Some(&prior)).await;
        assert_eq!(set.strategy, DetectionStrategy::RevisionHistory);
        assert_eq!(set.added, vec!["d.md"]);
        assert_eq!(set.modified, vec!["a.md"]);
        assert_eq!(set.deleted, vec!["b.md"]);
        assert_eq!(set.current_revision.as_deref(), Some("r2"));
        assert!(!set.working_tree_clean);
        assert_eq!(set.indexed_revision(), None);
    }

    #[tokio::test]
    async fn test_dirty_tree_at_recorded_revision_reads_working_tree() {
        let vcs = MockRevisionControl {
            revision: "r1".into(),
            clean: false,
            uncommitted: vec![PathChange::new("a.md", FileStatus::Modified)],
            ..Default::default()
        };
        let detector = ChangeDetector::new("/vault").with_revision_control(Arc::new(vcs));
        let prior = record(&[("a.md", "h1"), ("b.md", "h2")], Some("r1"));
        let set = detector
            .detect(&snapshot(&[("a.md", "edited"), ("b.md", "h2")]), Some(&prior))
            .await;
        assert_eq!(set.strategy, DetectionStrategy::RevisionHistory);
        assert_eq!(set.modified, vec!["a.md"]);
        assert_eq!(set.indexed_revision(), None);
    }

    #[tokio::test]
    async fn test_clean_check_failure_is_treated_as_dirty() {
        struct StatusFails;

        #[async_trait]
        impl RevisionControl for StatusFails {
            async fn is_repository(&self, _path: &Path) -> bool {
                true
            }
            async fn current_revision(&self, _path: &Path) -> RevisionResult<String> {
                Ok("r1".into())
            }
            async fn is_clean(&self, _path: &Path) -> RevisionResult<bool> {
                Err(RevisionError::Parse {
                    command: "git status".into(),
                    detail: "garbled".into(),
                })
            }
            async fn changes_between(
                &self,
                _path: &Path,
                _from: &str,
                _to: &str,
            ) -> RevisionResult<Vec<PathChange>> {
                Ok(Vec::new())
            }
            async fn uncommitted_changes(&self, _path: &Path) -> RevisionResult<Vec<PathChange>> {
                Ok(Vec::new())
            }
        }

        let detector = ChangeDetector::new("/vault").with_revision_control(Arc::new(StatusFails));
        let state = detector.revision_state().await;
        assert_eq!(state.revision.as_deref(), Some("r1"));
        assert!(!state.clean);

        let prior = record(&[("a.md", "h1")], Some("r1"));
        let set = detector
            .detect(&snapshot(&[("a.md", "h1")]), Some(&prior))
            .await;
        assert!(set.is_empty());
        assert_eq!(set.strategy, DetectionStrategy::RevisionHistory);
        assert_eq!(set.indexed_revision(), None);
    }

    #[tokio::test]
    async fn test_history_folds_renames() {
        let vcs = MockRevisionControl {
            revision: "r2".into(),
            clean: true,
            between: vec![
                PathChange::new("old.md", FileStatus::Deleted),
                PathChange::new("new.md", FileStatus::Added),
            ],
            ..Default::default()
        };
        let detector = ChangeDetector::new("/vault").with_revision_control(Arc::new(vcs));
        let prior = record(&[("old.md", "h1")], Some("r1"));
        let set = detector
            .detect(&snapshot(&[("new.md", "h1")]), Some(&prior))
            .await;
        assert_eq!(set.renamed.len(), 1);
        assert!(set.added.is_empty() && set.deleted.is_empty());
    }

    #[tokio::test]
    async fn test_facade_failure_falls_back_to_hashes() {
        let vcs = MockRevisionControl {
            revision: "r2".into(),
            clean: true,
            fail_history: true,
            ..Default::default()
        };
        let detector = ChangeDetector::new("/vault").with_revision_control(Arc::new(vcs));
        let prior = record(&[("a.md", "h1"), ("b.md", "h2")], Some("r1"));
        let set = detector
            .detect(&snapshot(&[("a.md", "h1"), ("b.md", "h9")]), Some(&prior))
            .await;
        assert_eq!(set.strategy, DetectionStrategy::ContentHash);
        assert_eq!(set.modified, vec!["b.md"]);
    }

    #[tokio::test]
    async fn test_prior_without_revision_uses_hashes() {
        let vcs = MockRevisionControl {
            revision: "r1".into(),
            clean: true,
            ..Default::default()
        };
        let detector = ChangeDetector::new("/vault").with_revision_control(Arc::new(vcs));
        let prior = record(&[("a.md", "h1")], None);
        let set = detector
            .detect(&snapshot(&[("a.md", "h2")]), Some(&prior))
            .await;
        assert_eq!(set.strategy, DetectionStrategy::ContentHash);
        assert_eq!(set.modified, vec!["a.md"]);
        assert_eq!(set.current_revision.as_deref(), Some("r1"));
    }

    #[test]
    fn test_full_reindex() {
        let prior = record(&[("a.md", "h1"), ("gone.md", "h2")], None);
        let set = ChangeSet::full_reindex(
            &snapshot(&[("a.md", "h1"), ("b.md", "h3")]),
            Some(&prior),
            RevisionState::default(),
        );
        assert!(set.needs_full_reindex);
        assert_eq!(set.strategy, DetectionStrategy::ForcedFull);
        assert_eq!(set.added, vec!["b.md"]);
        assert_eq!(set.modified, vec!["a.md"]);
        assert_eq!(set.deleted, vec!["gone.md"]);
        assert_eq!(
            set.summary(),
            ChangesSummary {
                added: 1,
                modified: 1,
                deleted: 1,
                renamed: 0
            }
        );
    }
}

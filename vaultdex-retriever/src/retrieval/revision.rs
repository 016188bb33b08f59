//! Narrow revision-control facade used by change detection.
//!
//! Nothing here is required for indexing to work: callers treat every error as a
//! signal to fall back to comparing content hashes.

use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
}

/// One path reported by the revision-control system, relative to the queried directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathChange {
    pub path: String,
    pub status: FileStatus,
}

impl PathChange {
    pub fn new(path: impl Into<String>, status: FileStatus) -> Self {
        Self {
            path: path.into(),
            status,
        }
    }
}

#[derive(Error, Debug)]
pub enum RevisionError {
    #[error("failed to run revision control: {0}")]
    Io(#[from] std::io::Error),

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("unexpected output from `{command}`: {detail}")]
    Parse { command: String, detail: String },
}

pub type RevisionResult<T> = std::result::Result<T, RevisionError>;

#[async_trait]
pub trait RevisionControl: Send + Sync {
    async fn is_repository(&self, path: &Path) -> bool;

    async fn current_revision(&self, path: &Path) -> RevisionResult<String>;

    /// True when the working tree under `path` has no staged, unstaged or untracked
    /// changes, ignoring the indexer's own files.
    async fn is_clean(&self, path: &Path) -> RevisionResult<bool>;

    /// Committed changes between two revisions, restricted to `path`.
    async fn changes_between(&self, path: &Path, from: &str, to: &str)
    -> RevisionResult<Vec<PathChange>>;

    /// Working-tree changes against the current revision, untracked files included.
    async fn uncommitted_changes(&self, path: &Path) -> RevisionResult<Vec<PathChange>>;
}

/// Pathspecs limiting git to the vault's own notes: the index database, its
/// journal files and the version record are written by every run and never count
/// as changes.
const VAULT_PATHSPEC: [&str; 2] = [".", ":(exclude,glob)**/.vaultdex*"];

/// [`RevisionControl`] backed by the `git` command line.
#[derive(Debug, Clone, Default)]
pub struct GitRevisionControl;

impl GitRevisionControl {
    pub fn new() -> Self {
        Self
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> RevisionResult<Vec<u8>> {
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .await?;
        if !output.status.success() {
            return Err(RevisionError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl RevisionControl for GitRevisionControl {
    async fn is_repository(&self, path: &Path) -> bool {
        match self.git(path, &["rev-parse", "--is-inside-work-tree"]).await {
            Ok(out) => String::from_utf8_lossy(&out).trim() == "true",
            Err(e) => {
                debug!("{} is not a git work tree: {}", path.display(), e);
                false
            }
        }
    }

    async fn current_revision(&self, path: &Path) -> RevisionResult<String> {
        let out = self.git(path, &["rev-parse", "HEAD"]).await?;
        let revision = String::from_utf8_lossy(&out).trim().to_string();
        if revision.is_empty() {
            return Err(RevisionError::Parse {
                command: "git rev-parse HEAD".into(),
                detail: "empty revision".into(),
            });
        }
        Ok(revision)
    }

    async fn is_clean(&self, path: &Path) -> RevisionResult<bool> {
        let out = self
            .git(
                path,
                &[
                    "status",
                    "--porcelain",
                    "-z",
                    "--untracked-files=all",
                    "--",
                    VAULT_PATHSPEC[0],
                    VAULT_PATHSPEC[1],
                ],
            )
            .await?;
        Ok(out.is_empty())
    }

    async fn changes_between(
        &self,
        path: &Path,
        from: &str,
        to: &str,
    ) -> RevisionResult<Vec<PathChange>> {
        let out = self
            .git(
                path,
                &["diff", "--name-status", "-z", "--no-renames", "--relative", from, to],
            )
            .await?;
        parse_name_status(&out)
    }

    async fn uncommitted_changes(&self, path: &Path) -> RevisionResult<Vec<PathChange>> {
        let tracked = self
            .git(
                path,
                &[
                    "diff",
                    "--name-status",
                    "-z",
                    "--no-renames",
                    "--relative",
                    "HEAD",
                    "--",
                    VAULT_PATHSPEC[0],
                    VAULT_PATHSPEC[1],
                ],
            )
            .await?;
        let mut changes = parse_name_status(&tracked)?;

        let untracked = self
            .git(
                path,
                &[
                    "ls-files",
                    "-z",
                    "--others",
                    "--exclude-standard",
                    "--",
                    VAULT_PATHSPEC[0],
                    VAULT_PATHSPEC[1],
                ],
            )
            .await?;
        changes.extend(
            split_nul(&untracked)
                .map(|p| PathChange::new(p, FileStatus::Added)),
        );
        Ok(changes)
    }
}

fn split_nul(out: &[u8]) -> impl Iterator<Item = String> + '_ {
    out.split(|b| *b == 0)
        .filter(|field| !field.is_empty())
        .map(|field| String::from_utf8_lossy(field).into_owned())
}

/// Parses `git diff --name-status -z --no-renames` output: status and path fields
/// alternate, each terminated by NUL.
fn parse_name_status(out: &[u8]) -> RevisionResult<Vec<PathChange>> {
    let fields: Vec<String> = split_nul(out).collect();
    if fields.len() % 2 != 0 {
        return Err(RevisionError::Parse {
            command: "git diff --name-status".into(),
            detail: format!("odd number of fields ({})", fields.len()),
        });
    }
    Ok(fields
        .chunks_exact(2)
        .map(|pair| {
            let status = match pair[0].chars().next() {
                Some('A') => FileStatus::Added,
                Some('D') => FileStatus::Deleted,
                _ => FileStatus::Modified,
            };
            PathChange::new(pair[1].clone(), status)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_parse_name_status() {
        let out = b"A\0new note.md\0M\0dir/changed.md\0D\0gone.md\0T\0link.md\0";
        let changes = parse_name_status(out).unwrap();
        assert_eq!(
            changes,
            vec![
                PathChange::new("new note.md", FileStatus::Added),
                PathChange::new("dir/changed.md", FileStatus::Modified),
                PathChange::new("gone.md", FileStatus::Deleted),
                PathChange::new("link.md", FileStatus::Modified),
            ]
        );
        assert!(parse_name_status(b"").unwrap().is_empty());
        assert!(parse_name_status(b"M\0").is_err());
    }

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["-c", "user.name=test", "-c", "user.email=test@example.com", "-c", "commit.gpgsign=false"])
            .args(args)
            .output()
            .unwrap();
        assert!(status.status.success(), "git {:?} failed", args);
    }

    #[tokio::test]
    async fn test_git_facade_against_real_repository() -> anyhow::Result<()> {
        if !git_available() {
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        let vcs = GitRevisionControl::new();

        git(root, &["init", "-q"]);
        std::fs::write(root.join("a.md"), "alpha")?;
        std::fs::write(root.join("b.md"), "beta")?;
        git(root, &["add", "."]);
        git(root, &["commit", "-q", "-m", "first"]);

        assert!(vcs.is_repository(root).await);
        let first = vcs.current_revision(root).await?;
        assert!(vcs.is_clean(root).await?);
        assert!(vcs.uncommitted_changes(root).await?.is_empty());

        std::fs::write(root.join("a.md"), "alpha two")?;
        std::fs::remove_file(root.join("b.md"))?;
        std::fs::write(root.join("c.md"), "gamma")?;
        git(root, &["add", "-A"]);
        git(root, &["commit", "-q", "-m", "second"]);
        let second = vcs.current_revision(root).await?;
        assert_ne!(first, second);

        let mut changes = vcs.changes_between(root, &first, &second).await?;
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(
            changes,
            vec![
                PathChange::new("a.md", FileStatus::Modified),
                PathChange::new("b.md", FileStatus::Deleted),
                PathChange::new("c.md", FileStatus::Added),
            ]
        );

        std::fs::write(root.join("d.md"), "delta")?;
        std::fs::write(root.join("c.md"), "gamma two")?;
        assert!(!vcs.is_clean(root).await?);
        let mut pending = vcs.uncommitted_changes(root).await?;
        pending.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(
            pending,
            vec![
                PathChange::new("c.md", FileStatus::Modified),
                PathChange::new("d.md", FileStatus::Added),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_index_files_do_not_dirty_the_tree() -> anyhow::Result<()> {
        if !git_available() {
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        let repo = dir.path();
        let vault = repo.join("vault");
        std::fs::create_dir_all(vault.join("sub"))?;
        let vcs = GitRevisionControl::new();

        git(repo, &["init", "-q"]);
        std::fs::write(vault.join("a.md"), "alpha")?;
        git(repo, &["add", "."]);
        git(repo, &["commit", "-q", "-m", "first"]);

        std::fs::write(vault.join(".vaultdex.db"), "db")?;
        std::fs::write(vault.join(".vaultdex.db-wal"), "wal")?;
        std::fs::write(vault.join(".vaultdex-version.json"), "{}")?;
        std::fs::write(vault.join("sub/.vaultdex.db"), "db")?;
        std::fs::write(repo.join("outside.md"), "not in the vault")?;
        assert!(vcs.is_clean(&vault).await?);
        assert!(vcs.uncommitted_changes(&vault).await?.is_empty());

        std::fs::write(vault.join("sub/new.md"), "new")?;
        assert!(!vcs.is_clean(&vault).await?);
        assert_eq!(
            vcs.uncommitted_changes(&vault).await?,
            vec![PathChange::new("sub/new.md", FileStatus::Added)]
        );
        Ok(())
    }
}

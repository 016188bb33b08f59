//! Vault walking and content hashing.
//!
//! [`FileDiscovery::scan`] produces a [`FileSnapshot`]: every note under the vault
//! root that survives the hidden-entry policy, the ignore and exclude lists, the
//! extension filter and the size cutoff, each with a blake3 hash of its full bytes.
//! Only an unreadable root is an error; problems with individual entries end up in
//! [`FileSnapshot::skipped`].

use crate::error::{IndexError, Result};
use chrono::{DateTime, Utc};
use glob::Pattern;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Bytes inspected when deciding whether a file is text.
const BINARY_SNIFF_LEN: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryOptions {
    /// Glob patterns over vault-relative paths. Empty means everything.
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    /// Extensions without the leading dot, compared case-insensitively.
    pub file_extensions: Vec<String>,
    pub include_hidden: bool,
    /// Vault-relative directories or files that are never entered. A bare name
    /// such as `.git` also matches at any depth.
    pub ignore_paths: Vec<String>,
    pub max_file_size: u64,
    pub respect_gitignore: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            file_extensions: vec!["md".into(), "markdown".into()],
            include_hidden: false,
            ignore_paths: vec![".obsidian".into(), ".trash".into(), ".git".into()],
            max_file_size: 10 * 1024 * 1024,
            respect_gitignore: true,
        }
    }
}

impl DiscoveryOptions {
    pub fn validate(&self) -> Result<()> {
        compile_patterns(&self.include_patterns)?;
        compile_patterns(&self.exclude_patterns)?;
        Ok(())
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| IndexError::Config(format!("invalid glob pattern {p:?}: {e}")))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    /// Path relative to the vault root, `/`-separated on every platform.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub extension: String,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub content_hash: String,
    /// False when the file looks binary despite its extension.
    pub is_indexable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub path: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct FileSnapshot {
    files: Vec<FileRecord>,
    pub skipped: Vec<SkippedEntry>,
}

impl FileSnapshot {
    pub fn new(mut files: Vec<FileRecord>, skipped: Vec<SkippedEntry>) -> Self {
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        files.dedup_by(|a, b| a.relative_path == b.relative_path);
        Self { files, skipped }
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn get(&self, relative_path: &str) -> Option<&FileRecord> {
        self.files
            .binary_search_by(|f| f.relative_path.as_str().cmp(relative_path))
            .ok()
            .map(|i| &self.files[i])
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Indexable files, in path order.
    pub fn indexable(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.iter().filter(|f| f.is_indexable)
    }

    pub fn paths(&self) -> Vec<String> {
        self.indexable().map(|f| f.relative_path.clone()).collect()
    }

    /// Path to content hash for every indexable file.
    pub fn hashes(&self) -> BTreeMap<String, String> {
        self.indexable()
            .map(|f| (f.relative_path.clone(), f.content_hash.clone()))
            .collect()
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub struct FileDiscovery {
    root: PathBuf,
    options: DiscoveryOptions,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl FileDiscovery {
    pub fn new(root: impl Into<PathBuf>, options: DiscoveryOptions) -> Result<Self> {
        let include = compile_patterns(&options.include_patterns)?;
        let exclude = compile_patterns(&options.exclude_patterns)?;
        Ok(Self {
            root: root.into(),
            options,
            include,
            exclude,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn scan(&self) -> Result<FileSnapshot> {
        let root = self.root.clone();
        let options = self.options.clone();
        let include = self.include.clone();
        let exclude = self.exclude.clone();
        tokio::task::spawn_blocking(move || scan_blocking(&root, &options, &include, &exclude))
            .await
            .map_err(|e| IndexError::Discovery {
                path: self.root.clone(),
                reason: e.to_string(),
            })?
    }
}

fn scan_blocking(
    root: &Path,
    options: &DiscoveryOptions,
    include: &[Pattern],
    exclude: &[Pattern],
) -> Result<FileSnapshot> {
    let discovery_error = |reason: String| IndexError::Discovery {
        path: root.to_path_buf(),
        reason,
    };
    let metadata = std::fs::metadata(root).map_err(|e| discovery_error(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(discovery_error("not a directory".into()));
    }
    std::fs::read_dir(root).map_err(|e| discovery_error(e.to_string()))?;

    let extensions: Vec<String> = options
        .file_extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect();

    let walk_root = root.to_path_buf();
    let ignore_paths = options.ignore_paths.clone();
    let walk_exclude = exclude.to_vec();
    let gitignore = options.respect_gitignore;
    let walker = WalkBuilder::new(root)
        .hidden(!options.include_hidden)
        .git_ignore(gitignore)
        .git_global(gitignore)
        .git_exclude(gitignore)
        .ignore(gitignore)
        .parents(gitignore)
        .require_git(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let Some(relative) = relative_path(&walk_root, entry.path()) else {
                return true;
            };
            if relative.is_empty() {
                return true;
            }
            !is_ignored_path(&relative, &ignore_paths)
                && !walk_exclude.iter().any(|p| p.matches(&relative))
        })
        .build();

    let mut files = Vec::new();
    let mut skipped = Vec::new();

    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                let path = error_path(&err).and_then(|p| relative_path(root, p));
                warn!("Skipping unreadable entry {:?}: {}", path, err);
                skipped.push(SkippedEntry {
                    path,
                    reason: err.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let Some(relative) = relative_path(root, path) else {
            continue;
        };
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if !extensions.contains(&extension) {
            continue;
        }
        if !include.is_empty() && !include.iter().any(|p| p.matches(&relative)) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                warn!("Skipping {}: {}", relative, err);
                skipped.push(SkippedEntry {
                    path: Some(relative),
                    reason: err.to_string(),
                });
                continue;
            }
        };
        if metadata.len() > options.max_file_size {
            warn!(
                "Skipping {} ({} bytes exceeds limit of {} bytes)",
                relative,
                metadata.len(),
                options.max_file_size
            );
            skipped.push(SkippedEntry {
                path: Some(relative),
                reason: format!("file size {} exceeds {}", metadata.len(), options.max_file_size),
            });
            continue;
        }

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Skipping {}: {}", relative, err);
                skipped.push(SkippedEntry {
                    path: Some(relative),
                    reason: err.to_string(),
                });
                continue;
            }
        };
        let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
        let is_indexable = !sniff.contains(&0);
        if !is_indexable {
            debug!("{} looks binary, excluding from indexing", relative);
        }

        files.push(FileRecord {
            relative_path: relative,
            absolute_path: path.to_path_buf(),
            extension,
            size_bytes: bytes.len() as u64,
            modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            content_hash: content_hash(&bytes),
            is_indexable,
        });
    }

    info!(
        "Discovered {} files under {} ({} skipped)",
        files.len(),
        root.display(),
        skipped.len()
    );
    Ok(FileSnapshot::new(files, skipped))
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

fn is_ignored_path(relative: &str, ignore_paths: &[String]) -> bool {
    ignore_paths.iter().any(|ignored| {
        let ignored = ignored.trim_matches('/');
        if ignored.is_empty() {
            return false;
        }
        relative == ignored
            || relative
                .strip_prefix(ignored)
                .is_some_and(|rest| rest.starts_with('/'))
            || (!ignored.contains('/') && relative.split('/').any(|part| part == ignored))
    })
}

fn error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child.as_path()),
        _ => None,
    }
}

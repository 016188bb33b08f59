//! Error types for the indexing pipeline.
//!
//! Only [`IndexError::Discovery`] and [`IndexError::VersionPersist`] abort a run.
//! [`IndexError::ChangeDetection`] is logged and detection falls back to content
//! hashes. The per-file variants are recorded as [`FileError`]s and the run carries on.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use vaultdex_embed::EmbedError;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("cannot scan vault root {path}: {reason}")]
    Discovery { path: PathBuf, reason: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to chunk {path}: {reason}")]
    Chunking { path: String, reason: String },

    #[error("failed to embed {path}: {source}")]
    Embedding {
        path: String,
        #[source]
        source: EmbedError,
    },

    #[error("storage operation failed for {path}: {reason}")]
    Storage { path: String, reason: String },

    #[error("failed to persist version record at {path}: {reason}")]
    VersionPersist { path: PathBuf, reason: String },

    #[error("change detection failed: {0}")]
    ChangeDetection(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl IndexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Discovery { .. } => ErrorKind::Discovery,
            Self::Read { .. } => ErrorKind::Read,
            Self::Chunking { .. } => ErrorKind::Chunking,
            Self::Embedding { .. } => ErrorKind::Embedding,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::VersionPersist { .. } => ErrorKind::VersionPersist,
            Self::ChangeDetection(_) => ErrorKind::ChangeDetection,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn storage(path: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            path: path.to_string(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Discovery,
    Read,
    Chunking,
    Embedding,
    Storage,
    VersionPersist,
    ChangeDetection,
    Config,
}

/// A failure isolated to one file during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileError {
    pub file: String,
    pub kind: ErrorKind,
    pub reason: String,
}

impl FileError {
    pub fn new(file: impl Into<String>, error: &IndexError) -> Self {
        Self {
            file: file.into(),
            kind: error.kind(),
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let discovery = IndexError::Discovery {
            path: PathBuf::from("/missing"),
            reason: "not a directory".into(),
        };
        assert_eq!(discovery.kind(), ErrorKind::Discovery);

        let detection = IndexError::ChangeDetection("git missing".into());
        assert_eq!(detection.kind(), ErrorKind::ChangeDetection);
        assert_eq!(detection.to_string(), "change detection failed: git missing");
    }

    #[test]
    fn test_file_error_carries_kind_and_message() {
        let err = IndexError::Read {
            path: "notes/a.md".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        let file_error = FileError::new("notes/a.md", &err);
        assert_eq!(file_error.kind, ErrorKind::Read);
        assert!(file_error.reason.contains("notes/a.md"));
        assert!(file_error.reason.contains("gone"));

        let json = serde_json::to_string(&file_error).unwrap();
        assert!(json.contains("\"kind\":\"read\""));
    }
}

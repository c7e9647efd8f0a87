//! Error type shared by every layer of dvault-core

use std::path::{Path, PathBuf};

use crate::object::ObjectId;

/// Result type for repository and workdir operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while storing, committing or synchronizing
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Repository not found: {}", .0.display())]
    RepositoryNotFound(PathBuf),

    #[error("Repository already exists: {}", .0.display())]
    RepositoryAlreadyExists(PathBuf),

    #[error("Revision not found: {0}")]
    RevisionNotFound(String),

    #[error("Blob not found: {0}")]
    BlobNotFound(ObjectId),

    #[error("Corrupt blob {id}: content hashes to {actual}")]
    CorruptBlob { id: ObjectId, actual: ObjectId },

    #[error("Workdir metadata corrupt at {}: {reason}", .path.display())]
    WorkdirMetadataCorrupt { path: PathBuf, reason: String },

    #[error("Path outside scope: {0}")]
    PathOutsideScope(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path is not tracked: {0}")]
    NotTracked(String),

    #[error("Failed to {op} {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn io(op: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            op,
            source,
        }
    }

    pub fn revision_not_found(id: Option<u64>) -> Self {
        match id {
            Some(id) => Self::RevisionNotFound(format!("r{}", id)),
            None => Self::RevisionNotFound("latest".to_string()),
        }
    }

    pub fn metadata_corrupt(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::WorkdirMetadataCorrupt {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Attach a path and operation name to a raw `io::Error`
pub(crate) trait IoContext<T> {
    fn with_path(self, op: &'static str, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn with_path(self, op: &'static str, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| Error::io(op, path, e))
    }
}

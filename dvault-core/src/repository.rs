//! Disk repository: blob store + revision log under one directory
//!
//! Layout on disk:
//! ```text
//! {root}/
//!   uuid                    — repository UUID
//!   config.json             — RepositoryConfig
//!   objects/{hash[0..2]}/{hash[2..]}  — content-addressed blobs
//!   revisions/{rev}.bin     — committed revisions
//!   refs/head               — latest revision number
//!   locks/                  — commit lock
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::blob_store::BlobStore;
use crate::config::RepositoryConfig;
use crate::error::{Error, IoContext, Result};
use crate::object::ObjectId;
use crate::revision_log::RevisionLog;

const UUID_FILE: &str = "uuid";

/// Handle on an existing repository. Cheap to clone; holds no open files.
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
    uuid: String,
    blobs: BlobStore,
    revisions: RevisionLog,
}

/// Outcome of [`Repository::verify`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub revisions: u64,
    pub files: u64,
    pub blobs: u64,
    /// Human-readable description of every problem found
    pub problems: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

impl Repository {
    /// Create a new, empty repository at `path`.
    ///
    /// Fails if `path` already holds a repository, or is a non-empty
    /// directory, or cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();

        if root.join(UUID_FILE).exists() {
            return Err(Error::RepositoryAlreadyExists(root));
        }
        match fs::read_dir(&root) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    return Err(Error::io(
                        "create repository in",
                        &root,
                        std::io::Error::new(ErrorKind::AlreadyExists, "directory is not empty"),
                    ));
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&root).with_path("create directory", &root)?;
            }
            Err(e) => return Err(Error::io("read directory", &root, e)),
        }

        BlobStore::create_layout(&root)?;
        RevisionLog::create_layout(&root)?;
        RepositoryConfig::default().save(&root)?;

        // The uuid file marks a complete repository, so it is written last.
        let uuid = uuid::Uuid::new_v4().to_string();
        let uuid_path = root.join(UUID_FILE);
        fs::write(&uuid_path, &uuid).with_path("write", &uuid_path)?;

        info!(path = %root.display(), %uuid, "created repository");
        Self::open(&root)
    }

    /// Open an existing repository
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let uuid_path = root.join(UUID_FILE);
        let uuid = match fs::read_to_string(&uuid_path) {
            Ok(text) => text.trim().to_string(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::RepositoryNotFound(root));
            }
            Err(e) => return Err(Error::io("read", &uuid_path, e)),
        };
        let config = RepositoryConfig::load(&root)?;

        Ok(Self {
            blobs: BlobStore::new(&root, config.verify_on_read),
            revisions: RevisionLog::new(&root),
            root,
            uuid,
        })
    }

    /// Repository root directory
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Get repository UUID
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn revisions(&self) -> &RevisionLog {
        &self.revisions
    }

    /// Check that every file of every revision points at an intact blob
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let Some(head) = self.revisions.head()? else {
            report.blobs = self.blobs.ids()?.len() as u64;
            return Ok(report);
        };

        let mut checked: BTreeSet<ObjectId> = BTreeSet::new();
        for rev in 1..=head {
            let revision = match self.revisions.get_revision(Some(rev)) {
                Ok(revision) => revision,
                Err(e) => {
                    report.problems.push(format!("r{}: {}", rev, e));
                    continue;
                }
            };
            report.revisions += 1;

            for (path, entry) in revision.manifest.files() {
                report.files += 1;
                if !checked.insert(entry.blob) {
                    continue;
                }
                if let Err(e) = self.blobs.verify(&entry.blob) {
                    warn!(rev, path = %path, error = %e, "verification failed");
                    report.problems.push(format!("r{} {}: {}", rev, path, e));
                }
            }
        }
        report.blobs = self.blobs.ids()?.len() as u64;
        Ok(report)
    }
}

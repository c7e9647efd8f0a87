//! Append-only, numbered revision log
//!
//! Layout on disk:
//! ```text
//! {root}/
//!   revisions/{rev}.bin    — committed revisions (bincode)
//!   refs/head              — latest revision number (text)
//!   locks/revisions.lock   — held exclusively while a revision is appended
//! ```
//!
//! A revision file is flushed and renamed into place before `refs/head` moves, so a
//! reader never sees a partially written revision. A revision file beyond
//! `refs/head` (crash between the two steps) counts as committed.

use fs4::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, IoContext, Result};
use crate::fs_util::replace_synced;
use crate::manifest::Tree;

const REVISIONS_DIR: &str = "revisions";
const REFS_DIR: &str = "refs";
const LOCKS_DIR: &str = "locks";

/// A committed snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: u64,
    /// Session that committed this revision
    pub session: String,
    /// Commit time (Unix seconds)
    pub timestamp: i64,
    pub manifest: Tree,
}

/// Short description of a revision for log listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionSummary {
    pub id: u64,
    pub session: String,
    pub timestamp: i64,
    pub file_count: usize,
}

impl From<&Revision> for RevisionSummary {
    fn from(rev: &Revision) -> Self {
        Self {
            id: rev.id,
            session: rev.session.clone(),
            timestamp: rev.timestamp,
            file_count: rev.manifest.file_count(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RevisionLog {
    root: PathBuf,
}

impl RevisionLog {
    pub(crate) fn new(repo_root: &Path) -> Self {
        Self {
            root: repo_root.to_path_buf(),
        }
    }

    pub(crate) fn create_layout(repo_root: &Path) -> Result<()> {
        for dir in [REVISIONS_DIR, REFS_DIR, LOCKS_DIR] {
            let path = repo_root.join(dir);
            fs::create_dir_all(&path).with_path("create directory", &path)?;
        }
        Ok(())
    }

    fn revision_path(&self, rev: u64) -> PathBuf {
        self.root.join(REVISIONS_DIR).join(format!("{}.bin", rev))
    }

    fn head_path(&self) -> PathBuf {
        self.root.join(REFS_DIR).join("head")
    }

    /// Latest committed revision, `None` for an empty log
    pub fn head(&self) -> Result<Option<u64>> {
        let head_path = self.head_path();
        let mut rev = match fs::read_to_string(&head_path) {
            Ok(text) => text.trim().parse::<u64>().map_err(|e| {
                Error::serialization(format!("{}: {}", head_path.display(), e))
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(Error::io("read", &head_path, e)),
        };
        while self.revision_path(rev + 1).exists() {
            rev += 1;
        }
        Ok((rev > 0).then_some(rev))
    }

    /// Load a revision; `None` asks for the latest one
    pub fn get_revision(&self, rev: Option<u64>) -> Result<Revision> {
        let id = match rev {
            Some(id) => id,
            None => self.head()?.ok_or_else(|| Error::revision_not_found(None))?,
        };
        self.load(id)
    }

    fn load(&self, rev: u64) -> Result<Revision> {
        let path = self.revision_path(rev);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::revision_not_found(Some(rev)));
            }
            Err(e) => return Err(Error::io("read", &path, e)),
        };
        bincode::deserialize(&data)
            .map_err(|e| Error::serialization(format!("{}: {}", path.display(), e)))
    }

    /// Append `manifest` as the next revision
    pub fn commit_revision(&self, session: &str, manifest: Tree) -> Result<u64> {
        self.commit_with(session, |_| Ok(manifest))
    }

    /// Append a revision built from the latest committed one.
    ///
    /// `build` runs while the log is locked, so the predecessor it sees is
    /// the one the new revision will follow.
    pub fn commit_with<F>(&self, session: &str, build: F) -> Result<u64>
    where
        F: FnOnce(Option<&Revision>) -> Result<Tree>,
    {
        let _lock = self.lock()?;

        let head = self.head()?;
        let previous = head.map(|rev| self.load(rev)).transpose()?;
        let manifest = build(previous.as_ref())?;

        let new_rev = head.map_or(1, |rev| rev + 1);
        let revision = Revision {
            id: new_rev,
            session: session.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            manifest,
        };

        let data = bincode::serialize(&revision).map_err(Error::serialization)?;
        let path = self.revision_path(new_rev);
        let tmp_path = path.with_extension("tmp");
        replace_synced(&tmp_path, &path, &data)?;
        self.save_head(new_rev)?;

        info!(
            rev = new_rev,
            session,
            files = revision.manifest.file_count(),
            "committed revision"
        );
        Ok(new_rev)
    }

    /// Revisions newest first, at most `limit` of them
    pub fn log(&self, limit: usize) -> Result<Vec<RevisionSummary>> {
        let Some(head) = self.head()? else {
            return Ok(Vec::new());
        };
        let mut result = Vec::new();
        for rev in (1..=head).rev() {
            if result.len() >= limit {
                break;
            }
            result.push(RevisionSummary::from(&self.load(rev)?));
        }
        Ok(result)
    }

    fn save_head(&self, rev: u64) -> Result<()> {
        let path = self.head_path();
        let tmp_path = path.with_extension("tmp");
        replace_synced(&tmp_path, &path, rev.to_string().as_bytes())
    }

    /// Exclusive lock released when the returned file is dropped
    fn lock(&self) -> Result<File> {
        let path = self.root.join(LOCKS_DIR).join("revisions.lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_path("open lock", &path)?;
        file.lock_exclusive().with_path("lock", &path)?;
        debug!(lock = %path.display(), "acquired revision lock");
        Ok(file)
    }
}

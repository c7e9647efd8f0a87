//! Workdir state persisted at `<workdir>/.meta/info`.
//!
//! Records which repository, session and scope the directory is bound to,
//! the last synced revision, and a fingerprint for every tracked file so
//! change detection can skip hashing files whose size and mtime are as
//! recorded.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoContext, Result};
use crate::manifest::FileEntry;
use crate::object::ObjectId;

/// Reserved directory inside every workdir
pub const META_DIR: &str = ".meta";
const INFO_FILE: &str = "info";

/// What a tracked file looked like at the last sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub size: u64,
    /// Nanoseconds since the Unix epoch
    pub mtime: i64,
    pub blob: ObjectId,
    pub mode: u32,
}

impl From<FileEntry> for Fingerprint {
    fn from(entry: FileEntry) -> Self {
        Self {
            size: entry.size,
            mtime: entry.mtime,
            blob: entry.blob,
            mode: entry.mode,
        }
    }
}

/// Persisted workdir binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkdirMetadata {
    /// Repository this workdir synchronizes with
    pub repository: PathBuf,
    /// UUID of that repository; fingerprints only name blobs stored there
    #[serde(default)]
    pub repository_uuid: String,
    /// Session name used when committing
    pub session: String,
    /// Subtree of the repository mirrored by the workdir root
    pub scope: String,
    /// Last revision checked in or out, `None` if never synced
    pub revision: Option<u64>,
    /// Workdir-relative path -> fingerprint
    #[serde(default)]
    pub fingerprints: BTreeMap<String, Fingerprint>,
    /// Tracked paths explicitly removed since the last sync
    #[serde(default)]
    pub removed: BTreeSet<String>,
}

impl WorkdirMetadata {
    pub fn new(repository: PathBuf, repository_uuid: String, session: String, scope: String) -> Self {
        Self {
            repository,
            repository_uuid,
            session,
            scope,
            revision: None,
            fingerprints: BTreeMap::new(),
            removed: BTreeSet::new(),
        }
    }

    pub fn info_path(workdir: &Path) -> PathBuf {
        workdir.join(META_DIR).join(INFO_FILE)
    }

    /// Load the record from a workdir, `None` if the directory was never bound
    pub fn load(workdir: &Path) -> Result<Option<Self>> {
        let info_path = Self::info_path(workdir);
        let data = match fs::read_to_string(&info_path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io("read", &info_path, e)),
        };
        let meta: WorkdirMetadata = serde_json::from_str(&data)
            .map_err(|e| Error::metadata_corrupt(&info_path, e.to_string()))?;
        meta.validate(&info_path)?;
        Ok(Some(meta))
    }

    /// Save the record, replacing the previous one atomically
    pub fn save(&self, workdir: &Path) -> Result<()> {
        let info_path = Self::info_path(workdir);
        if let Some(parent) = info_path.parent() {
            fs::create_dir_all(parent).with_path("create directory", parent)?;
        }
        let tmp_path = info_path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self).map_err(Error::serialization)?;
        fs::write(&tmp_path, &data).with_path("write", &tmp_path)?;
        fs::rename(&tmp_path, &info_path).with_path("rename", &info_path)?;
        Ok(())
    }

    fn validate(&self, info_path: &Path) -> Result<()> {
        if self.revision == Some(0) {
            return Err(Error::metadata_corrupt(info_path, "revision 0 does not exist"));
        }
        for path in self.fingerprints.keys().chain(self.removed.iter()) {
            let normalized = crate::manifest::normalize_path(path)
                .map_err(|_| Error::metadata_corrupt(info_path, format!("bad path {:?}", path)))?;
            if normalized.is_empty() || normalized != *path || is_reserved(path) {
                return Err(Error::metadata_corrupt(
                    info_path,
                    format!("bad path {:?}", path),
                ));
            }
        }
        if let Some(stray) = self.removed.iter().find(|p| !self.fingerprints.contains_key(*p)) {
            return Err(Error::metadata_corrupt(
                info_path,
                format!("removed path {:?} is not tracked", stray),
            ));
        }
        Ok(())
    }
}

/// Whether a workdir-relative path falls inside the reserved metadata directory
pub fn is_reserved(path: &str) -> bool {
    path == META_DIR || path.starts_with(&format!("{}/", META_DIR))
}

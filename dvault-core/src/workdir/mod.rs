//! Working directories bound to a repository
//!
//! A workdir mirrors one subtree of the repository (its scope; the empty
//! scope is the whole tree): the manifest path `<scope>/<p>` lives at
//! `<root>/<p>`. State needed to resume after a restart is kept in
//! `<root>/.meta/info`.

pub mod changes;
pub mod metadata;
mod stat;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, IoContext, Result};
use crate::manifest::{FileEntry, Tree, normalize_path};
use crate::progress::ProgressObserver;
use crate::repository::Repository;

pub use changes::Changes;
pub use metadata::{Fingerprint, META_DIR, WorkdirMetadata};

/// A directory synchronized against a repository
pub struct Workdir {
    repo: Repository,
    root: PathBuf,
    meta: WorkdirMetadata,
    observer: Option<Box<dyn ProgressObserver>>,
}

impl std::fmt::Debug for Workdir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workdir")
            .field("root", &self.root)
            .field("repository", &self.repo.path())
            .field("session", &self.meta.session)
            .field("scope", &self.meta.scope)
            .field("revision", &self.meta.revision)
            .finish()
    }
}

impl Workdir {
    /// Bind `root` to `repo` under `scope`.
    ///
    /// The directory need not exist yet. If it already carries metadata, that
    /// state is resumed; it must have been bound to the same repository (by
    /// UUID, so a moved repository is still accepted) and the same scope.
    pub fn bind(
        repo: Repository,
        session: impl Into<String>,
        scope: &str,
        observer: Option<Box<dyn ProgressObserver>>,
        root: impl AsRef<Path>,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let scope = normalize_path(scope)?;
        let session = session.into();

        let meta = match WorkdirMetadata::load(&root)? {
            Some(mut meta) => {
                if meta.scope != scope {
                    return Err(Error::metadata_corrupt(
                        WorkdirMetadata::info_path(&root),
                        format!("bound to scope {:?}, not {:?}", meta.scope, scope),
                    ));
                }
                check_repository(&meta, &repo, &root)?;
                meta.repository = repo.path().to_path_buf();
                meta.repository_uuid = repo.uuid().to_string();
                meta.session = session;
                meta
            }
            None => WorkdirMetadata::new(
                repo.path().to_path_buf(),
                repo.uuid().to_string(),
                session,
                scope,
            ),
        };

        debug!(root = %root.display(), scope = %meta.scope, rev = ?meta.revision, "bound workdir");
        Ok(Self {
            repo,
            root,
            meta,
            observer,
        })
    }

    /// Re-open a previously bound workdir from its metadata alone
    pub fn open(root: impl AsRef<Path>, observer: Option<Box<dyn ProgressObserver>>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let info_path = WorkdirMetadata::info_path(&root);
        let meta = WorkdirMetadata::load(&root)?
            .ok_or_else(|| Error::metadata_corrupt(&info_path, "no workdir metadata"))?;
        let repo = Repository::open(&meta.repository)?;
        check_repository(&meta, &repo, &root)?;
        Ok(Self {
            repo,
            root,
            meta,
            observer,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn session(&self) -> &str {
        &self.meta.session
    }

    pub fn scope(&self) -> &str {
        &self.meta.scope
    }

    /// Last revision checked in or out
    pub fn revision(&self) -> Option<u64> {
        self.meta.revision
    }

    pub fn metadata(&self) -> &WorkdirMetadata {
        &self.meta
    }

    /// Classify every file on disk or in the last synced state
    pub fn get_changes(&self) -> Result<Changes> {
        Ok(changes::scan(&self.root, &self.meta)?.changes)
    }

    /// Stop tracking `path`. The file on disk is left alone; the next
    /// checkin drops it from the repository.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        if !self.meta.fingerprints.contains_key(&path) {
            return Err(Error::NotTracked(path));
        }
        let mut meta = self.meta.clone();
        meta.removed.insert(path.clone());
        meta.save(&self.root)?;
        self.meta = meta;
        debug!(path = %path, "marked for removal");
        Ok(())
    }

    /// Snapshot the workdir into a new revision
    pub fn checkin(&mut self) -> Result<u64> {
        let scan = changes::scan(&self.root, &self.meta)?;
        let changes = &scan.changes;
        let total = changes.unchanged.len() + changes.new.len() + changes.changed.len();
        let mut done = 0;

        let mut subtree = Tree::new();
        for path in &changes.unchanged {
            let (Some(fp), Some(obs)) = (self.meta.fingerprints.get(path), scan.observed.get(path))
            else {
                continue;
            };
            let entry = FileEntry {
                blob: fp.blob,
                size: obs.size,
                mode: obs.mode,
                mtime: obs.mtime,
            };
            subtree.insert_file(path, entry)?;
            done += 1;
            self.notify("checkin", path, done, total);
        }

        for path in changes.new.iter().chain(&changes.changed) {
            let Some(obs) = scan.observed.get(path) else {
                continue;
            };
            let full_path = self.root.join(path);
            let data = fs::read(&full_path).with_path("read", &full_path)?;
            let blob = self.repo.blobs().put(&data)?;
            let entry = FileEntry {
                blob,
                size: data.len() as u64,
                mode: obs.mode,
                mtime: obs.mtime,
            };
            subtree.insert_file(path, entry)?;
            done += 1;
            self.notify("checkin", path, done, total);
        }

        let scope = self.meta.scope.clone();
        let subtree = Arc::new(subtree);
        let rev = self.repo.revisions().commit_with(&self.meta.session, |previous| {
            // Outside the scope the new revision carries over the latest one.
            let empty = Tree::new();
            let base = match previous {
                Some(previous) if !scope.is_empty() => &previous.manifest,
                _ => &empty,
            };
            base.with_subtree(&scope, Arc::clone(&subtree))
        })?;

        let mut meta = self.meta.clone();
        meta.fingerprints = subtree
            .files()
            .into_iter()
            .map(|(path, entry)| (path, Fingerprint::from(entry)))
            .collect();
        meta.removed.clear();
        meta.revision = Some(rev);
        meta.save(&self.root)?;
        self.meta = meta;

        info!(
            rev,
            scope = %scope,
            new = changes.new.len(),
            changed = changes.changed.len(),
            dropped = changes.missing.len() + changes.deleted.len(),
            "checked in"
        );
        self.complete("checkin");
        Ok(rev)
    }

    /// Write the files of `revision` (latest if `None`) into the workdir.
    ///
    /// Files in the workdir that the revision does not contain are left in
    /// place. Returns the revision checked out.
    pub fn checkout(&mut self, revision: Option<u64>) -> Result<u64> {
        let revision = self.repo.revisions().get_revision(revision)?;
        let scope = self.meta.scope.clone();
        let subtree = revision.manifest.subtree(&scope).ok_or_else(|| {
            Error::PathOutsideScope(format!("{} does not exist in r{}", scope, revision.id))
        })?;

        fs::create_dir_all(&self.root).with_path("create directory", &self.root)?;
        for dir in subtree.dirs() {
            if metadata::is_reserved(&dir) {
                continue;
            }
            let path = self.root.join(&dir);
            fs::create_dir_all(&path).with_path("create directory", &path)?;
        }

        let files: Vec<(String, FileEntry)> = subtree
            .files()
            .into_iter()
            .filter(|(path, _)| {
                let reserved = metadata::is_reserved(path);
                if reserved {
                    warn!(path = %path, rev = revision.id, "not overwriting workdir metadata");
                }
                !reserved
            })
            .collect();
        let total = files.len();
        let mut meta = self.meta.clone();
        meta.fingerprints.clear();

        for (done, (path, entry)) in files.into_iter().enumerate() {
            let fp = self.write_file(&path, &entry)?;
            meta.fingerprints.insert(path.clone(), fp);
            self.notify("checkout", &path, done + 1, total);
        }

        meta.removed.clear();
        meta.revision = Some(revision.id);
        meta.save(&self.root)?;
        self.meta = meta;

        info!(rev = revision.id, scope = %scope, files = total, "checked out");
        self.complete("checkout");
        Ok(revision.id)
    }

    /// Materialize one file and fingerprint it as written
    fn write_file(&self, path: &str, entry: &FileEntry) -> Result<Fingerprint> {
        let dest = self.root.join(path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).with_path("create directory", parent)?;
        }
        let data = self.repo.blobs().get(&entry.blob)?;

        // Replace rather than truncate, so read-only files can be overwritten.
        match fs::remove_file(&dest) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io("replace", &dest, e)),
        }
        fs::write(&dest, &data).with_path("write", &dest)?;
        stat::set_file_mode(&dest, entry.mode)?;
        stat::set_mtime_nanos(&dest, entry.mtime)?;

        // Re-read: the filesystem may round the mtime.
        let md = fs::metadata(&dest).with_path("stat", &dest)?;
        Ok(Fingerprint {
            size: md.len(),
            mtime: stat::mtime_nanos(&md),
            blob: entry.blob,
            mode: entry.mode,
        })
    }

    fn notify(&self, operation: &str, path: &str, done: usize, total: usize) {
        if let Some(observer) = &self.observer {
            observer.on_file(operation, path, done, total);
        }
    }

    fn complete(&self, operation: &str) {
        if let Some(observer) = &self.observer {
            observer.on_complete(operation);
        }
    }
}

/// Fingerprints name blobs of one repository; refuse to pair them with another.
///
/// Records written before the UUID was stored fall back to the path.
fn check_repository(meta: &WorkdirMetadata, repo: &Repository, root: &Path) -> Result<()> {
    let same = if meta.repository_uuid.is_empty() {
        meta.repository == repo.path()
    } else {
        meta.repository_uuid == repo.uuid()
    };
    if same {
        return Ok(());
    }
    Err(Error::metadata_corrupt(
        WorkdirMetadata::info_path(root),
        format!(
            "bound to repository {} ({}), not {} ({})",
            meta.repository.display(),
            meta.repository_uuid,
            repo.path().display(),
            repo.uuid()
        ),
    ))
}

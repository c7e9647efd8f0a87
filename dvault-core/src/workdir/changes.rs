//! Five-way change classification of a workdir against its last sync
//!
//! The scan walks the workdir (skipping `.meta/`) and compares each regular
//! file with its fingerprint. Matching size and mtime means unchanged without
//! reading the file; otherwise the content is hashed and compared with the
//! recorded blob id.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Component, Path};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, IoContext, Result};
use crate::object::ObjectId;
use crate::workdir::metadata::{META_DIR, WorkdirMetadata};
use crate::workdir::stat;

/// Result of comparing a workdir with its last synced state.
///
/// Every path on disk or in the fingerprint cache lands in exactly one
/// bucket. Paths are workdir-relative, `/`-separated and sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub unchanged: Vec<String>,
    pub new: Vec<String>,
    pub changed: Vec<String>,
    pub missing: Vec<String>,
    pub deleted: Vec<String>,
}

impl Changes {
    /// Buckets in the order `(unchanged, new, changed, missing, deleted)`
    pub fn into_tuple(self) -> (Vec<String>, Vec<String>, Vec<String>, Vec<String>, Vec<String>) {
        (self.unchanged, self.new, self.changed, self.missing, self.deleted)
    }

    /// True when a checkin would not change anything
    pub fn is_clean(&self) -> bool {
        self.new.is_empty()
            && self.changed.is_empty()
            && self.missing.is_empty()
            && self.deleted.is_empty()
    }

    fn sort(&mut self) {
        for bucket in [
            &mut self.unchanged,
            &mut self.new,
            &mut self.changed,
            &mut self.missing,
            &mut self.deleted,
        ] {
            bucket.sort();
        }
    }
}

/// Stat data observed for a file present on disk
#[derive(Debug, Clone, Copy)]
pub(crate) struct Observed {
    pub size: u64,
    pub mtime: i64,
    pub mode: u32,
}

/// Classification plus what was seen on disk, so checkin can reuse the stat
pub(crate) struct Scan {
    pub changes: Changes,
    pub observed: BTreeMap<String, Observed>,
}

/// Compare the tree under `root` with `meta`. Never writes anything.
pub(crate) fn scan(root: &Path, meta: &WorkdirMetadata) -> Result<Scan> {
    let mut changes = Changes::default();
    let mut observed = BTreeMap::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    if root.is_dir() {
        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !(e.depth() == 1 && e.file_name() == META_DIR));

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                Error::io("walk", path, e.into())
            })?;
            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() {
                warn!(path = %entry.path().display(), "skipping non-regular file");
                continue;
            }

            let Some(rel) = relative_path(root, entry.path())? else {
                warn!(path = %entry.path().display(), "skipping file with non-UTF-8 name");
                continue;
            };
            let md = entry
                .metadata()
                .map_err(|e| Error::io("stat", entry.path(), e.into()))?;
            let obs = Observed {
                size: md.len(),
                mtime: stat::mtime_nanos(&md),
                mode: stat::file_mode(&md),
            };
            seen.insert(rel.clone());

            if meta.removed.contains(&rel) {
                changes.deleted.push(rel);
                continue;
            }

            match meta.fingerprints.get(&rel) {
                None => changes.new.push(rel.clone()),
                Some(fp) if fp.size == obs.size && fp.mtime == obs.mtime => {
                    changes.unchanged.push(rel.clone());
                }
                Some(fp) => {
                    let file = File::open(entry.path()).with_path("open", entry.path())?;
                    let hash = ObjectId::from_reader(file).with_path("read", entry.path())?;
                    if hash == fp.blob {
                        debug!(path = %rel, "fingerprint stale, content unchanged");
                        changes.unchanged.push(rel.clone());
                    } else {
                        changes.changed.push(rel.clone());
                    }
                }
            }
            observed.insert(rel, obs);
        }
    }

    for path in meta.fingerprints.keys() {
        if seen.contains(path) {
            continue;
        }
        if meta.removed.contains(path) {
            changes.deleted.push(path.clone());
        } else {
            changes.missing.push(path.clone());
        }
    }

    changes.sort();
    Ok(Scan { changes, observed })
}

/// `/`-joined path of `path` below `root`, `None` if a name is not valid UTF-8
fn relative_path(root: &Path, path: &Path) -> Result<Option<String>> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| Error::invalid_path(path.display().to_string()))?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(name) => match name.to_str() {
                Some(name) => parts.push(name),
                None => return Ok(None),
            },
            _ => return Err(Error::invalid_path(path.display().to_string())),
        }
    }
    Ok(Some(parts.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workdir::metadata::Fingerprint;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Fingerprint matching the file exactly as it is on disk now
    fn snapshot(root: &Path, rel: &str) -> Fingerprint {
        let path = root.join(rel);
        let md = fs::metadata(&path).unwrap();
        Fingerprint {
            size: md.len(),
            mtime: stat::mtime_nanos(&md),
            blob: ObjectId::from_data(&fs::read(&path).unwrap()),
            mode: stat::file_mode(&md),
        }
    }

    fn meta() -> WorkdirMetadata {
        WorkdirMetadata::new("/repo".into(), "u".into(), "s".into(), "".into())
    }

    #[test]
    fn test_empty_dir() {
        let tmp = TempDir::new().unwrap();
        let scan = scan(tmp.path(), &meta()).unwrap();
        assert_eq!(scan.changes, Changes::default());
        assert!(scan.changes.is_clean());
    }

    #[test]
    fn test_missing_root_reports_everything_missing() {
        let tmp = TempDir::new().unwrap();
        let mut m = meta();
        m.fingerprints.insert(
            "a.txt".into(),
            Fingerprint { size: 1, mtime: 0, blob: ObjectId::from_data(b"a"), mode: 0o644 },
        );
        let scan = scan(&tmp.path().join("gone"), &m).unwrap();
        assert_eq!(scan.changes.missing, vec!["a.txt"]);
    }

    #[test]
    fn test_all_buckets() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "same.txt", b"same");
        write(root, "edited.txt", b"before");
        write(root, "gone.txt", b"gone");
        write(root, "dropped.txt", b"dropped");

        let mut m = meta();
        for name in ["same.txt", "edited.txt", "gone.txt", "dropped.txt"] {
            m.fingerprints.insert(name.into(), snapshot(root, name));
        }
        m.removed.insert("dropped.txt".into());

        write(root, "edited.txt", b"after!!");
        fs::remove_file(root.join("gone.txt")).unwrap();
        write(root, "sub/fresh.txt", b"fresh");

        let changes = scan(root, &m).unwrap().changes;
        assert_eq!(changes.unchanged, vec!["same.txt"]);
        assert_eq!(changes.new, vec!["sub/fresh.txt"]);
        assert_eq!(changes.changed, vec!["edited.txt"]);
        assert_eq!(changes.missing, vec!["gone.txt"]);
        assert_eq!(changes.deleted, vec!["dropped.txt"]);
        assert!(!changes.is_clean());
    }

    #[test]
    fn test_touched_file_is_unchanged() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "a.txt", b"content");

        let mut m = meta();
        let mut fp = snapshot(root, "a.txt");
        fp.mtime -= 10_000_000_000;
        m.fingerprints.insert("a.txt".into(), fp);

        let scan = scan(root, &m).unwrap();
        assert_eq!(scan.changes.unchanged, vec!["a.txt"]);
        assert_ne!(scan.observed["a.txt"].mtime, fp.mtime);
    }

    #[test]
    fn test_fast_path_skips_hashing() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "a.txt", b"content");

        // Wrong blob id but matching size/mtime: trusted without reading.
        let mut m = meta();
        let mut fp = snapshot(root, "a.txt");
        fp.blob = ObjectId::from_data(b"something else");
        m.fingerprints.insert("a.txt".into(), fp);

        assert_eq!(scan(root, &m).unwrap().changes.unchanged, vec!["a.txt"]);
    }

    #[test]
    fn test_meta_dir_is_ignored_only_at_top() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, ".meta/info", b"{}");
        write(root, "nested/.meta/info", b"tracked like any file");

        let changes = scan(root, &meta()).unwrap().changes;
        assert_eq!(changes.new, vec!["nested/.meta/info"]);
    }

    #[test]
    fn test_removed_and_deleted_from_disk_is_deleted() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "a.txt", b"a");
        let mut m = meta();
        m.fingerprints.insert("a.txt".into(), snapshot(root, "a.txt"));
        m.removed.insert("a.txt".into());
        fs::remove_file(root.join("a.txt")).unwrap();

        let changes = scan(root, &m).unwrap().changes;
        assert_eq!(changes.deleted, vec!["a.txt"]);
        assert!(changes.missing.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "target.txt", b"t");
        std::os::unix::fs::symlink(root.join("target.txt"), root.join("link.txt")).unwrap();

        let changes = scan(root, &meta()).unwrap().changes;
        assert_eq!(changes.new, vec!["target.txt"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_are_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "ok.txt", b"fine");
        fs::write(root.join(OsStr::from_bytes(b"caf\xe9.txt")), b"latin-1").unwrap();

        let scan = scan(root, &meta()).unwrap();
        assert_eq!(scan.changes.new, vec!["ok.txt"]);
        assert_eq!(scan.observed.len(), 1);
    }

    #[test]
    fn test_into_tuple_order() {
        let changes = Changes {
            unchanged: vec!["u".into()],
            new: vec!["n".into()],
            changed: vec!["c".into()],
            missing: vec!["m".into()],
            deleted: vec!["d".into()],
        };
        let (u, n, c, m, d) = changes.into_tuple();
        assert_eq!((u[0].as_str(), n[0].as_str(), c[0].as_str(), m[0].as_str(), d[0].as_str()), ("u", "n", "c", "m", "d"));
    }
}

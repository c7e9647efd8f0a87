//! Content-addressed blob storage
//!
//! Blobs live under `objects/{hash[0..2]}/{hash[2..]}` (like git loose
//! objects). Writes go through a temp file and a rename, so a blob either
//! exists completely or not at all, and concurrent writers of the same content
//! race harmlessly towards the same final bytes.

use bytes::Bytes;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, IoContext, Result};
use crate::fs_util::replace_synced;
use crate::object::ObjectId;

const OBJECTS_DIR: &str = "objects";

/// Disk-backed blob store rooted inside a repository
#[derive(Debug, Clone)]
pub struct BlobStore {
    objects: PathBuf,
    verify_on_read: bool,
}

impl BlobStore {
    pub(crate) fn new(repo_root: &Path, verify_on_read: bool) -> Self {
        Self {
            objects: repo_root.join(OBJECTS_DIR),
            verify_on_read,
        }
    }

    pub(crate) fn create_layout(repo_root: &Path) -> Result<()> {
        let dir = repo_root.join(OBJECTS_DIR);
        fs::create_dir_all(&dir).with_path("create directory", &dir)
    }

    /// Path a blob with the given id is (or would be) stored at
    pub fn path_for(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.objects.join(&hex[..2]).join(&hex[2..])
    }

    /// Store `data`, returning its id. Storing existing content is a no-op.
    pub fn put(&self, data: &[u8]) -> Result<ObjectId> {
        let id = ObjectId::from_data(data);
        let path = self.path_for(&id);
        if path.exists() {
            debug!(blob = %id, "blob already stored");
            return Ok(id);
        }

        let shard = path.parent().unwrap_or(&self.objects);
        fs::create_dir_all(shard).with_path("create directory", shard)?;

        // Unique per writer; concurrent puts of one blob must not share a temp file.
        let tmp_path = shard.join(format!(
            ".{}.{}.tmp",
            &id.to_hex()[2..],
            uuid::Uuid::new_v4().simple()
        ));
        replace_synced(&tmp_path, &path, data)?;

        debug!(blob = %id, size = data.len(), "stored blob");
        Ok(id)
    }

    /// Load a blob, checking its content against the id when verification is on
    pub fn get(&self, id: &ObjectId) -> Result<Bytes> {
        let path = self.path_for(id);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::BlobNotFound(*id)),
            Err(e) => return Err(Error::io("read", &path, e)),
        };

        if self.verify_on_read {
            let actual = ObjectId::from_data(&data);
            if actual != *id {
                warn!(blob = %id, actual = %actual, "blob content does not match its id");
                return Err(Error::CorruptBlob { id: *id, actual });
            }
        }

        Ok(Bytes::from(data))
    }

    /// Check if a blob exists
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.path_for(id).is_file()
    }

    /// Re-hash a stored blob regardless of the `verify_on_read` setting
    pub fn verify(&self, id: &ObjectId) -> Result<()> {
        let path = self.path_for(id);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::BlobNotFound(*id)),
            Err(e) => return Err(Error::io("open", &path, e)),
        };
        let actual = ObjectId::from_reader(file).with_path("read", &path)?;
        if actual != *id {
            return Err(Error::CorruptBlob { id: *id, actual });
        }
        Ok(())
    }

    /// List the ids of all stored blobs
    pub fn ids(&self) -> Result<Vec<ObjectId>> {
        let mut ids = Vec::new();
        for entry in walkdir::WalkDir::new(&self.objects).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.objects.clone());
                Error::io("list", path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let shard = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let Some(rest) = entry.file_name().to_str() else {
                continue;
            };
            // Leftover temp files from interrupted writes are not blobs.
            if let Ok(id) = ObjectId::from_hex(&format!("{}{}", shard, rest)) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> BlobStore {
        BlobStore::create_layout(tmp.path()).unwrap();
        BlobStore::new(tmp.path(), true)
    }

    #[test]
    fn test_put_and_get() {
        let tmp = TempDir::new().unwrap();
        let blobs = store(&tmp);

        let id = blobs.put(b"tjosanhejsan").unwrap();
        assert_eq!(id, ObjectId::from_data(b"tjosanhejsan"));
        assert!(blobs.contains(&id));
        assert_eq!(blobs.get(&id).unwrap().as_ref(), b"tjosanhejsan");
    }

    #[test]
    fn test_put_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let blobs = store(&tmp);

        let a = blobs.put(b"same").unwrap();
        let b = blobs.put(b"same").unwrap();
        assert_eq!(a, b);
        assert_eq!(blobs.ids().unwrap(), vec![a]);
    }

    #[test]
    fn test_sharded_layout() {
        let tmp = TempDir::new().unwrap();
        let blobs = store(&tmp);

        let id = blobs.put(b"layout").unwrap();
        let hex = id.to_hex();
        let expected = tmp.path().join("objects").join(&hex[..2]).join(&hex[2..]);
        assert_eq!(blobs.path_for(&id), expected);
        assert!(expected.is_file());
    }

    #[test]
    fn test_missing_blob() {
        let tmp = TempDir::new().unwrap();
        let blobs = store(&tmp);

        let id = ObjectId::from_data(b"never stored");
        assert!(matches!(blobs.get(&id), Err(Error::BlobNotFound(missing)) if missing == id));
        assert!(matches!(blobs.verify(&id), Err(Error::BlobNotFound(_))));
    }

    #[test]
    fn test_corrupt_blob_detected() {
        let tmp = TempDir::new().unwrap();
        let blobs = store(&tmp);

        let id = blobs.put(b"original").unwrap();
        fs::write(blobs.path_for(&id), b"tampered").unwrap();

        match blobs.get(&id) {
            Err(Error::CorruptBlob { id: bad, actual }) => {
                assert_eq!(bad, id);
                assert_eq!(actual, ObjectId::from_data(b"tampered"));
            }
            other => panic!("expected CorruptBlob, got {:?}", other),
        }
        assert!(matches!(blobs.verify(&id), Err(Error::CorruptBlob { .. })));

        // Without read verification the bytes come back as stored.
        let unchecked = BlobStore::new(tmp.path(), false);
        assert_eq!(unchecked.get(&id).unwrap().as_ref(), b"tampered");
    }

    #[test]
    fn test_ids_skip_temp_files() {
        let tmp = TempDir::new().unwrap();
        let blobs = store(&tmp);

        let id = blobs.put(b"kept").unwrap();
        let shard = blobs.path_for(&id).parent().unwrap().to_path_buf();
        fs::write(shard.join(".leftover.tmp"), b"partial").unwrap();

        assert_eq!(blobs.ids().unwrap(), vec![id]);
    }
}

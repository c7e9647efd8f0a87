//! Durable file replacement: write a temp file, flush it, rename it over the target

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{IoContext, Result};

/// Write `data` to `tmp`, sync it to disk, then rename it to `dest`.
///
/// The temp file is removed again if the rename fails.
pub(crate) fn replace_synced(tmp: &Path, dest: &Path, data: &[u8]) -> Result<()> {
    {
        let mut file = File::create(tmp).with_path("create", tmp)?;
        file.write_all(data).with_path("write", tmp)?;
        file.sync_all().with_path("flush", tmp)?;
    }
    if let Err(e) = fs::rename(tmp, dest).with_path("rename", dest) {
        let _ = fs::remove_file(tmp);
        return Err(e);
    }
    if let Some(parent) = dest.parent() {
        fsync_dir(parent);
    }
    Ok(())
}

/// Best effort: persist the directory entry created by a rename
fn fsync_dir(dir: &Path) {
    if let Ok(file) = File::open(dir) {
        let _ = file.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_replaces_existing_file() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("head");
        fs::write(&dest, b"1").unwrap();

        replace_synced(&tmp.path().join("head.tmp"), &dest, b"2").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"2");
        assert!(!tmp.path().join("head.tmp").exists());
    }

    #[test]
    fn test_failed_rename_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let temp_file = tmp.path().join("x.tmp");
        let dest = tmp.path().join("missing-dir").join("x");

        assert!(replace_synced(&temp_file, &dest, b"data").is_err());
        assert!(!temp_file.exists());
    }
}

//! File metadata helpers: nanosecond mtimes and permission bits

use filetime::FileTime;
use std::fs::Metadata;
use std::path::Path;

use crate::error::{IoContext, Result};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Modification time as nanoseconds since the Unix epoch
pub(crate) fn mtime_nanos(md: &Metadata) -> i64 {
    let ft = FileTime::from_last_modification_time(md);
    ft.unix_seconds()
        .saturating_mul(NANOS_PER_SEC)
        .saturating_add(i64::from(ft.nanoseconds()))
}

pub(crate) fn set_mtime_nanos(path: &Path, nanos: i64) -> Result<()> {
    let ft = FileTime::from_unix_time(
        nanos.div_euclid(NANOS_PER_SEC),
        nanos.rem_euclid(NANOS_PER_SEC) as u32,
    );
    filetime::set_file_mtime(path, ft).with_path("set mtime of", path)
}

#[cfg(unix)]
pub(crate) fn file_mode(md: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub(crate) fn file_mode(md: &Metadata) -> u32 {
    if md.permissions().readonly() { 0o444 } else { 0o644 }
}

#[cfg(unix)]
pub(crate) fn set_file_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_path("set permissions of", path)
}

#[cfg(not(unix))]
pub(crate) fn set_file_mode(path: &Path, mode: u32) -> Result<()> {
    let mut perms = std::fs::metadata(path).with_path("stat", path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    std::fs::set_permissions(path, perms).with_path("set permissions of", path)
}

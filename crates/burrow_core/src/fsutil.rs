//! Crash-safe filesystem helpers.

use crate::error::StoreResult;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Writes `bytes` to `path` atomically.
///
/// Write-then-rename: the bytes land in a `.tmp` sibling, the temp file is
/// synced, renamed over the target, and the parent directory fsynced so the
/// rename itself is durable. A crash at any point leaves either the old file
/// or the new one, never a half-written mix.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp_path = match path.extension() {
        Some(ext) => {
            let mut ext = ext.to_os_string();
            ext.push(".tmp");
            path.with_extension(ext)
        }
        None => path.with_extension("tmp"),
    };

    let mut file = File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Fsyncs a directory so entry creations, renames, and deletions are durable.
#[cfg(unix)]
pub(crate) fn sync_dir(path: &Path) -> StoreResult<()> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

/// Windows NTFS journals metadata, so the explicit fsync is skipped.
#[cfg(not(unix))]
pub(crate) fn sync_dir(_path: &Path) -> StoreResult<()> {
    Ok(())
}

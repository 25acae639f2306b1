//! State file persistence
//!
//! Snapshot and cursor files are replaced atomically (temp file in the same
//! directory, then rename) and every read-modify-write of the graph
//! snapshot happens under an advisory lock on a sibling `.lock` file.

use fs4::fs_std::FileExt;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::GraphResult;

/// Replace `path` with `bytes`; readers see the old or the new file, never a torn one
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Exclusive cross-process lock guarding one graph snapshot.
/// Released when dropped.
#[derive(Debug)]
pub struct SnapshotLock {
    file: File,
    path: PathBuf,
}

impl SnapshotLock {
    /// Block until the lock for `snapshot` is held
    pub fn acquire(snapshot: &Path) -> GraphResult<Self> {
        let path = lock_path(snapshot);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        FileExt::lock_exclusive(&file)?;
        debug!("Locked {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        // Closing the file releases the lock as well
        let _ = FileExt::unlock(&self.file);
    }
}

fn lock_path(snapshot: &Path) -> PathBuf {
    let mut name = OsString::from(snapshot.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

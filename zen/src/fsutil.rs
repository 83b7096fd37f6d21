//! Filesystem helpers shared by the cache, the credential file and the
//! task renderer
//!
//! Every write goes through a temporary file in the destination directory
//! followed by a rename, so an interrupted write never leaves a partial
//! file behind.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Result, ZenError};

/// Create `dir` and any missing parents, applying `mode` to the
/// directories this call creates (Unix only)
///
/// # Errors
///
/// Returns an I/O error naming `dir`.
pub fn create_dir_all_with_mode(dir: &Path, mode: u32) -> Result<()> {
    if dir.as_os_str().is_empty() || dir.is_dir() {
        return Ok(());
    }

    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    builder.create(dir).map_err(|e| ZenError::io(dir, e))
}

/// Atomically replace `path` with `contents`
///
/// Missing parent directories are created with `dir_mode`; the final file
/// carries `file_mode` (Unix only).
///
/// # Errors
///
/// Returns an I/O error naming the path that failed.
pub fn write_atomic(path: &Path, contents: &[u8], file_mode: u32, dir_mode: u32) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    create_dir_all_with_mode(parent, dir_mode)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| ZenError::io(parent, e))?;
    tmp.write_all(contents).map_err(|e| ZenError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| ZenError::io(tmp.path(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(file_mode))
            .map_err(|e| ZenError::io(tmp.path(), e))?;
    }
    #[cfg(not(unix))]
    let _ = file_mode;

    tmp.persist(path).map_err(|e| ZenError::io(path, e.error))?;
    Ok(())
}

/// Remove a file, treating "already gone" as success
///
/// # Errors
///
/// Returns an I/O error for anything other than a missing file.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ZenError::io(path, e)),
    }
}

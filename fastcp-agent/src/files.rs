//! Filesystem helpers shared by the engine, the handlers and the migrations.

use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;

use walkdir::WalkDir;

use crate::errors::{AgentError, Result};

/// Replace `path` with `contents` in one step.
///
/// The data goes to a temporary file in the same directory which is then
/// renamed over the target, so readers see either the old or the new file.
/// The parent directory must already exist.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| AgentError::io("create temp file in", parent, e))?;
    tmp.as_file()
        .set_permissions(std::fs::Permissions::from_mode(mode))
        .map_err(|e| AgentError::io("set permissions on", tmp.path(), e))?;
    tmp.write_all(contents)
        .map_err(|e| AgentError::io("write", path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| AgentError::io("sync", path, e))?;
    tmp.persist(path)
        .map_err(|e| AgentError::io("replace", path, e.error))?;
    Ok(())
}

/// Create `path` and missing parents. `mode` applies to created directories only.
pub fn ensure_dir(path: &Path, mode: u32) -> Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .map_err(|e| AgentError::io("create directory", path, e))
}

/// Create an empty file if nothing exists at `path`.
pub fn touch(path: &Path, mode: u32) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    std::fs::write(path, b"").map_err(|e| AgentError::io("create", path, e))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| AgentError::io("set permissions on", path, e))
}

/// Remove a file, treating "already gone" as success. Returns whether it existed.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(AgentError::io("remove", path, e)),
    }
}

pub fn chown(path: &Path, uid: u32, gid: u32) -> Result<()> {
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
        .map_err(|e| AgentError::io("change owner of", path, e))
}

/// Change ownership of `path` and everything below it. Symlinks are not followed.
pub fn chown_recursive(path: &Path, uid: u32, gid: u32) -> Result<()> {
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(|e| {
            let at = e.path().unwrap_or(path).to_path_buf();
            AgentError::io("walk", at, e.into())
        })?;
        std::os::unix::fs::lchown(entry.path(), Some(uid), Some(gid))
            .map_err(|e| AgentError::io("change owner of", entry.path(), e))?;
    }
    Ok(())
}

/// Glob-free listing of the files in `dir` whose names satisfy `matches`, sorted.
pub fn list_matching(dir: &Path, matches: impl Fn(&str) -> bool) -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut out: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_str().is_some_and(&matches))
        .map(|e| e.path())
        .collect();
    out.sort();
    out
}

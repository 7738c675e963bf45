//! Bootstrap of missing Bazel descriptor files.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::core::label::{MODULE_FILE, build_file_for};

const PLACEHOLDER: &str = "# created by bld\n";

/// Create a placeholder `BUILD.bazel` for `target`'s package if it is missing.
///
/// Returns the created path, or `None` when the file already exists or the
/// label is not package-qualified.
pub fn ensure_build_file(worktree: &Path, target: &str) -> Result<Option<PathBuf>> {
    let Some(relative) = build_file_for(target) else {
        return Ok(None);
    };
    let path = worktree.join(relative);
    if exists(&path)? {
        return Ok(None);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    fs::write(&path, PLACEHOLDER).with_context(|| format!("write {}", path.display()))?;
    info!(path = %path.display(), "created placeholder build file");
    Ok(Some(path))
}

/// Create an empty `MODULE.bazel` in `dir` if missing. Returns true if created.
pub fn ensure_module_file(dir: &Path) -> Result<bool> {
    let path = dir.join(MODULE_FILE);
    if exists(&path)? {
        return Ok(false);
    }
    info!(path = %path.display(), "MODULE.bazel not found, creating an empty one");
    fs::write(&path, "").with_context(|| format!("create {}", path.display()))?;
    Ok(true)
}

fn exists(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("stat {}", path.display())),
    }
}

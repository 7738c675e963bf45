//! Bazel label helpers.
//!
//! Only the package part of a label matters to the runner: it locates the
//! `BUILD.bazel` file handed to the repair agent and scaffolded when missing.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

pub const BUILD_FILE: &str = "BUILD.bazel";
pub const MODULE_FILE: &str = "MODULE.bazel";

static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^//(?P<package>[^:]*)(?::(?P<name>.+))?$").expect("label regex should be valid")
});

/// Package of a `//pkg:name` label. `Some("")` is the root package.
///
/// Returns `None` for labels that are not package-qualified.
pub fn package_of(target: &str) -> Option<&str> {
    let caps = LABEL_RE.captures(target)?;
    caps.name("package").map(|m| m.as_str())
}

/// `BUILD.bazel` path of the label's package, relative to the workspace root.
pub fn build_file_for(target: &str) -> Option<PathBuf> {
    let package = package_of(target)?;
    if package.is_empty() {
        return Some(PathBuf::from(BUILD_FILE));
    }
    Some(PathBuf::from(package).join(BUILD_FILE))
}

/// Files offered to the repair agent for `target`, in a stable order.
pub fn files_to_consider(target: &str) -> Vec<PathBuf> {
    let mut files = vec![PathBuf::from(MODULE_FILE)];
    if let Some(build_file) = build_file_for(target) {
        files.push(build_file);
    }
    files
}

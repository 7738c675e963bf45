//! Deterministic branch and worktree naming for model sessions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Replace characters that are unsafe in file paths and ref names with hyphens.
pub fn sanitize_path(raw: &str) -> String {
    raw.replace(['/', ':'], "-")
}

/// Branch used by `model`'s session, derived from the branch the run started on.
pub fn session_branch(base_branch: &str, model: &str) -> String {
    format!("{base_branch}-{}", sanitize_path(model))
}

/// Worktree directory for a session branch.
pub fn session_worktree(worktree_dir: &Path, branch: &str) -> PathBuf {
    worktree_dir.join(branch)
}

/// Groups of models whose sanitized names collide, in first-seen order.
///
/// An empty result means the model set maps one-to-one onto branch names.
pub fn branch_collisions(models: &[String]) -> Vec<Vec<String>> {
    let mut by_suffix: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut order = Vec::new();
    for model in models {
        let suffix = sanitize_path(model);
        let group = by_suffix.entry(suffix.clone()).or_default();
        if group.is_empty() {
            order.push(suffix);
        }
        if !group.contains(model) {
            group.push(model.clone());
        }
    }
    order
        .into_iter()
        .filter_map(|suffix| by_suffix.remove(&suffix))
        .filter(|group| group.len() > 1)
        .collect()
}

//! Session management: one branch and one worktree per model.
//!
//! A session's branch is `<base branch>-<sanitized model>` and its worktree
//! lives at `<worktree dir>/<branch>`. Both are created on first use and reused
//! by later runs; the runner never deletes them.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::naming::{session_branch, session_worktree};
use crate::core::types::Session;
use crate::io::git::VersionControl;

/// Derives and ensures model sessions against one shared repository.
pub struct SessionManager<'a, V: VersionControl> {
    vcs: &'a V,
    repo: PathBuf,
    base_branch: String,
    worktree_dir: PathBuf,
    // Branch creation and worktree registration mutate shared repository metadata.
    repo_lock: Mutex<()>,
}

impl<'a, V: VersionControl> SessionManager<'a, V> {
    pub fn new(
        vcs: &'a V,
        repo: impl Into<PathBuf>,
        base_branch: impl Into<String>,
        worktree_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            vcs,
            repo: repo.into(),
            base_branch: base_branch.into(),
            worktree_dir: worktree_dir.into(),
            repo_lock: Mutex::new(()),
        }
    }

    /// Build a manager whose base branch is the repository's current branch.
    pub fn discover(
        vcs: &'a V,
        repo: impl Into<PathBuf>,
        worktree_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let repo = repo.into();
        let base_branch = vcs
            .current_branch(&repo)
            .with_context(|| format!("read current branch of {}", repo.display()))?;
        info!(branch = %base_branch, "current git branch");
        Ok(Self::new(vcs, repo, base_branch, worktree_dir))
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    /// Session naming for `model`, without touching the repository.
    pub fn session_for(&self, model: &str) -> Session {
        let branch = session_branch(&self.base_branch, model);
        let worktree = session_worktree(&self.worktree_dir, &branch);
        Session {
            model: model.to_string(),
            branch,
            worktree,
        }
    }

    /// Ensure `model`'s branch and worktree exist and return its session.
    #[instrument(skip_all, fields(model = %model))]
    pub fn ensure(&self, model: &str) -> Result<Session> {
        let session = self.session_for(model);
        let _guard = self
            .repo_lock
            .lock()
            .map_err(|_| anyhow!("repository lock poisoned"))?;
        self.ensure_branch(&session.branch)
            .with_context(|| format!("ensure branch {} exists", session.branch))?;
        self.ensure_worktree(&session.worktree, &session.branch)
            .with_context(|| {
                format!("ensure worktree at {} exists", session.worktree.display())
            })?;
        Ok(session)
    }

    /// Create `branch` at HEAD unless it already exists.
    pub fn ensure_branch(&self, branch: &str) -> Result<()> {
        if self.vcs.branch_exists(&self.repo, branch)? {
            debug!(branch, "branch already exists");
            return Ok(());
        }
        info!(branch, "branch does not exist, creating");
        self.vcs.create_branch(&self.repo, branch)?;
        info!(branch, "branch created");
        Ok(())
    }

    /// Attach a worktree for `branch` at `path` unless something already lives there.
    pub fn ensure_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        if self.vcs.worktree_exists(path)? {
            debug!(worktree = %path.display(), "worktree already exists");
            return Ok(());
        }
        info!(worktree = %path.display(), "worktree does not exist, creating");
        self.vcs.add_worktree(&self.repo, path, branch)?;
        info!(worktree = %path.display(), "worktree created");
        Ok(())
    }
}

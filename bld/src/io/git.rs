//! Git adapter for session management and commit/rollback.
//!
//! Every repository mutation the runner performs goes through the
//! [`VersionControl`] trait. [`GitCli`] implements it with a small, explicit
//! wrapper around `git` subprocess calls; tests use an in-memory fake.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CommandOutput, run_command_with_timeout};

pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 100_000;

/// Printed by `git stash push` when the worktree has nothing to save.
const NOTHING_TO_STASH: &str = "No local changes to save";

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Result of a successful `git stash push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StashOutcome {
    Stashed,
    NothingToStash,
}

/// Version control operations used by the session manager and repair loop.
pub trait VersionControl: Send + Sync {
    /// Current branch of the repository at `repo` (errors on detached HEAD).
    fn current_branch(&self, repo: &Path) -> Result<String>;
    fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool>;
    /// Create `branch` at the current HEAD without checking it out.
    fn create_branch(&self, repo: &Path, branch: &str) -> Result<()>;
    /// True if any filesystem entry exists at `path`.
    fn worktree_exists(&self, path: &Path) -> Result<bool>;
    fn add_worktree(&self, repo: &Path, path: &Path, branch: &str) -> Result<()>;
    fn stage_all(&self, worktree: &Path) -> Result<()>;
    fn status_is_clean(&self, worktree: &Path) -> Result<bool>;
    fn commit(&self, worktree: &Path, message: &str) -> Result<()>;
    /// Stash tracked and untracked changes, restoring the last commit.
    fn stash_all(&self, worktree: &Path, label: &str) -> Result<StashOutcome>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            timeout: DEFAULT_GIT_TIMEOUT,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn with_limits(mut self, timeout: Duration, output_limit_bytes: usize) -> Self {
        self.timeout = timeout;
        self.output_limit_bytes = output_limit_bytes;
        self
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Check whether a local branch exists.
    ///
    /// `show-ref` exits 1 for a missing ref; any other failure is an error.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let reference = format!("refs/heads/{branch}");
        let args = ["show-ref", "--verify", "--quiet", reference.as_str()];
        let output = self.run(&args)?;
        if output.success() {
            return Ok(true);
        }
        if !output.timed_out && output.status.code() == Some(1) {
            return Ok(false);
        }
        Err(failure(&args, &output))
    }

    /// Create a branch at current HEAD, leaving the checkout untouched.
    #[instrument(skip_all, fields(branch = %branch))]
    pub fn create_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating branch");
        self.run_checked(&["branch", branch])?;
        Ok(())
    }

    /// Attach a new worktree at `path` with `branch` checked out.
    #[instrument(skip_all, fields(path = %path.display(), branch = %branch))]
    pub fn add_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        let path_arg = path.to_string_lossy();
        debug!("adding worktree");
        self.run_checked(&["worktree", "add", path_arg.as_ref(), branch])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Stage specific paths.
    pub fn add_paths(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.run_checked(&args)?;
        Ok(())
    }

    /// Commit whatever is staged.
    #[instrument(skip_all)]
    pub fn commit(&self, message: &str) -> Result<()> {
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(())
    }

    /// Stash tracked and untracked changes under `label`.
    #[instrument(skip_all, fields(label = %label))]
    pub fn stash_push_all(&self, label: &str) -> Result<StashOutcome> {
        let out = self.run_checked(&["stash", "push", "--include-untracked", "-m", label])?;
        let text = out.combined();
        debug!(output = %text, "git stash output");
        if text.contains(NOTHING_TO_STASH) {
            return Ok(StashOutcome::NothingToStash);
        }
        Ok(StashOutcome::Stashed)
    }

    /// Subject line of the last commit on HEAD.
    pub fn last_commit_subject(&self) -> Result<String> {
        let out = self.run_capture(&["log", "-1", "--pretty=%s"])?;
        Ok(out.trim().to_string())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(output.stdout_text())
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args)?;
        if !output.success() {
            return Err(failure(args, &output));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run git {}", args.join(" ")))
    }
}

fn failure(args: &[&str], output: &CommandOutput) -> anyhow::Error {
    if output.timed_out {
        return anyhow!("git {} timed out", args.join(" "));
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    anyhow!("git {} failed: {}", args.join(" "), stderr.trim())
}

/// [`VersionControl`] backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitCli {
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(DEFAULT_GIT_TIMEOUT, DEFAULT_OUTPUT_LIMIT_BYTES)
    }
}

impl GitCli {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            timeout,
            output_limit_bytes,
        }
    }

    pub fn at(&self, workdir: &Path) -> Git {
        Git::new(workdir).with_limits(self.timeout, self.output_limit_bytes)
    }
}

impl VersionControl for GitCli {
    fn current_branch(&self, repo: &Path) -> Result<String> {
        self.at(repo).current_branch()
    }

    fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool> {
        self.at(repo).branch_exists(branch)
    }

    fn create_branch(&self, repo: &Path, branch: &str) -> Result<()> {
        self.at(repo).create_branch(branch)
    }

    fn worktree_exists(&self, path: &Path) -> Result<bool> {
        match fs::symlink_metadata(path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("check worktree at {}", path.display()))
            }
        }
    }

    fn add_worktree(&self, repo: &Path, path: &Path, branch: &str) -> Result<()> {
        self.at(repo).add_worktree(path, branch)
    }

    fn stage_all(&self, worktree: &Path) -> Result<()> {
        self.at(worktree).add_all()
    }

    fn status_is_clean(&self, worktree: &Path) -> Result<bool> {
        let entries = self.at(worktree).status_porcelain()?;
        if !entries.is_empty() {
            let changed: Vec<String> = entries
                .iter()
                .map(|entry| format!("{} {}", entry.code, entry.path))
                .collect();
            debug!(worktree = %worktree.display(), ?changed, "worktree has changes");
        }
        Ok(entries.is_empty())
    }

    fn commit(&self, worktree: &Path, message: &str) -> Result<()> {
        self.at(worktree).commit(message)?;
        info!(worktree = %worktree.display(), message, "committed changes");
        Ok(())
    }

    fn stash_all(&self, worktree: &Path, label: &str) -> Result<StashOutcome> {
        self.at(worktree).stash_push_all(label)
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

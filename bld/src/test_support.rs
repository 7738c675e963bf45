//! Test-only fixtures: a throwaway git repository and scripted fakes for the
//! version-control, build-system and agent seams.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::naming::session_branch;
use crate::core::types::Session;
use crate::io::agent::{RepairAgent, RepairRequest};
use crate::io::bazel::{BuildSystem, Validation};
use crate::io::git::{Git, StashOutcome, VersionControl};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A session whose worktree is a fresh temp directory.
pub fn scratch_session(model: &str) -> (TempDir, Session) {
    let temp = tempfile::tempdir().expect("tempdir");
    let session = Session {
        model: model.to_string(),
        branch: session_branch("main", model),
        worktree: temp.path().to_path_buf(),
    };
    (temp, session)
}

/// A git repository with one commit on `main`, plus a sibling directory for worktrees.
pub struct TestRepo {
    temp: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        let root = temp.path().join("repo");
        fs::create_dir_all(&root).with_context(|| format!("create {}", root.display()))?;
        let setup: [&[&str]; 4] = [
            &["init", "--initial-branch=main"],
            &["config", "user.email", "bld@example.com"],
            &["config", "user.name", "bld"],
            &["config", "commit.gpgsign", "false"],
        ];
        for args in setup {
            git(&root, args)?;
        }
        fs::write(root.join("README.md"), "# fixture\n").context("write README.md")?;
        git(&root, &["add", "README.md"])?;
        git(&root, &["commit", "-m", "initial commit"])?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> PathBuf {
        self.temp.path().join("repo")
    }

    /// Directory outside the repository where session worktrees may be placed.
    pub fn worktree_dir(&self) -> PathBuf {
        self.temp.path().join("trees")
    }

    pub fn git(&self) -> Git {
        Git::new(self.root())
    }
}

fn git(dir: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("run git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Scripted result for one `stash_all` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedStash {
    Stashed,
    Nothing,
    Fail,
}

/// Observable state of a [`ScriptedVcs`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VcsState {
    pub branches: BTreeSet<String>,
    pub worktrees: BTreeSet<PathBuf>,
    pub created_branches: Vec<String>,
    pub added_worktrees: Vec<PathBuf>,
    pub stage_calls: usize,
    pub commits: Vec<(PathBuf, String)>,
    pub stashes: Vec<(PathBuf, String)>,
}

#[derive(Debug, Default)]
struct VcsFailures {
    current_branch: bool,
    create_branch: bool,
    add_worktree: BTreeSet<PathBuf>,
    commit: bool,
}

/// In-memory [`VersionControl`].
///
/// `status_is_clean` reports the configured dirtiness. Stash results come
/// from a queue and default to [`ScriptedStash::Stashed`] once it is empty.
#[derive(Debug)]
pub struct ScriptedVcs {
    current: String,
    dirty: bool,
    failures: VcsFailures,
    stash_results: Mutex<VecDeque<ScriptedStash>>,
    state: Mutex<VcsState>,
}

impl ScriptedVcs {
    pub fn new(current_branch: &str) -> Self {
        let mut state = VcsState::default();
        state.branches.insert(current_branch.to_string());
        Self {
            current: current_branch.to_string(),
            dirty: false,
            failures: VcsFailures::default(),
            stash_results: Mutex::new(VecDeque::new()),
            state: Mutex::new(state),
        }
    }

    pub fn with_branch(self, branch: &str) -> Self {
        lock(&self.state).branches.insert(branch.to_string());
        self
    }

    pub fn with_stash_results(self, results: Vec<ScriptedStash>) -> Self {
        lock(&self.stash_results).extend(results);
        self
    }

    /// Report uncommitted changes after staging.
    pub fn dirty(mut self) -> Self {
        self.dirty = true;
        self
    }

    pub fn failing_current_branch(mut self) -> Self {
        self.failures.current_branch = true;
        self
    }

    pub fn failing_create_branch(mut self) -> Self {
        self.failures.create_branch = true;
        self
    }

    pub fn failing_add_worktree(mut self, path: impl Into<PathBuf>) -> Self {
        self.failures.add_worktree.insert(path.into());
        self
    }

    pub fn failing_commit(mut self) -> Self {
        self.failures.commit = true;
        self
    }

    pub fn snapshot(&self) -> VcsState {
        lock(&self.state).clone()
    }
}

impl VersionControl for ScriptedVcs {
    fn current_branch(&self, _repo: &Path) -> Result<String> {
        if self.failures.current_branch {
            bail!("HEAD is detached");
        }
        Ok(self.current.clone())
    }

    fn branch_exists(&self, _repo: &Path, branch: &str) -> Result<bool> {
        Ok(lock(&self.state).branches.contains(branch))
    }

    fn create_branch(&self, _repo: &Path, branch: &str) -> Result<()> {
        if self.failures.create_branch {
            bail!("fatal: cannot lock ref 'refs/heads/{branch}'");
        }
        let mut state = lock(&self.state);
        state.branches.insert(branch.to_string());
        state.created_branches.push(branch.to_string());
        Ok(())
    }

    fn worktree_exists(&self, path: &Path) -> Result<bool> {
        Ok(lock(&self.state).worktrees.contains(path))
    }

    fn add_worktree(&self, _repo: &Path, path: &Path, branch: &str) -> Result<()> {
        if self.failures.add_worktree.contains(path) {
            bail!("fatal: '{branch}' is already checked out");
        }
        let mut state = lock(&self.state);
        state.worktrees.insert(path.to_path_buf());
        state.added_worktrees.push(path.to_path_buf());
        Ok(())
    }

    fn stage_all(&self, _worktree: &Path) -> Result<()> {
        lock(&self.state).stage_calls += 1;
        Ok(())
    }

    fn status_is_clean(&self, _worktree: &Path) -> Result<bool> {
        Ok(!self.dirty)
    }

    fn commit(&self, worktree: &Path, message: &str) -> Result<()> {
        if self.failures.commit {
            bail!("commit hook rejected the commit");
        }
        lock(&self.state)
            .commits
            .push((worktree.to_path_buf(), message.to_string()));
        Ok(())
    }

    fn stash_all(&self, worktree: &Path, label: &str) -> Result<StashOutcome> {
        let next = lock(&self.stash_results)
            .pop_front()
            .unwrap_or(ScriptedStash::Stashed);
        match next {
            ScriptedStash::Fail => Err(anyhow!("could not write index")),
            ScriptedStash::Nothing => Ok(StashOutcome::NothingToStash),
            ScriptedStash::Stashed => {
                lock(&self.state)
                    .stashes
                    .push((worktree.to_path_buf(), label.to_string()));
                Ok(StashOutcome::Stashed)
            }
        }
    }
}

type Script = BTreeMap<String, VecDeque<Result<Validation, String>>>;

/// [`BuildSystem`] answering from per-target queues.
///
/// A call against an empty queue is an error, which the repair loop treats as
/// an infrastructure failure.
#[derive(Debug, Default)]
pub struct ScriptedBuild {
    queries: Mutex<Script>,
    builds: Mutex<Script>,
}

impl ScriptedBuild {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(self, target: &str, results: Vec<Validation>) -> Self {
        push_results(&self.queries, target, results);
        self
    }

    pub fn build(self, target: &str, results: Vec<Validation>) -> Self {
        push_results(&self.builds, target, results);
        self
    }

    /// Make the next `query` for `target` fail to run at all.
    pub fn failing_next_query(self, target: &str) -> Self {
        lock(&self.queries)
            .entry(target.to_string())
            .or_default()
            .push_front(Err("bazel server crashed".to_string()));
        self
    }

    /// Error if any scripted result was never consumed.
    pub fn assert_drained(&self) -> Result<()> {
        for (kind, script) in [("query", &self.queries), ("build", &self.builds)] {
            for (target, queue) in lock(script).iter() {
                if !queue.is_empty() {
                    bail!("{} unused {kind} results for {target}", queue.len());
                }
            }
        }
        Ok(())
    }
}

fn push_results(script: &Mutex<Script>, target: &str, results: Vec<Validation>) {
    lock(script)
        .entry(target.to_string())
        .or_default()
        .extend(results.into_iter().map(Ok));
}

fn next_result(script: &Mutex<Script>, kind: &str, target: &str) -> Result<Validation> {
    match lock(script).get_mut(target).and_then(VecDeque::pop_front) {
        Some(Ok(validation)) => Ok(validation),
        Some(Err(message)) => Err(anyhow!(message)),
        None => Err(anyhow!("no scripted {kind} result for {target}")),
    }
}

impl BuildSystem for ScriptedBuild {
    fn query(&self, _workdir: &Path, target: &str) -> Result<Validation> {
        next_result(&self.queries, "query", target)
    }

    fn build(&self, _workdir: &Path, target: &str) -> Result<Validation> {
        next_result(&self.builds, "build", target)
    }
}

/// Scripted behavior for one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedRepair {
    Ok,
    Fail(String),
    /// Write `contents` to `path` (relative to the worktree), then succeed.
    Write { path: PathBuf, contents: String },
}

/// [`RepairAgent`] that replays a queue and records every request.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    script: Mutex<VecDeque<ScriptedRepair>>,
    requests: Mutex<Vec<RepairRequest>>,
}

impl ScriptedAgent {
    pub fn new(script: Vec<ScriptedRepair>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// An agent that succeeds `times` times.
    pub fn succeeding(times: usize) -> Self {
        Self::new(vec![ScriptedRepair::Ok; times])
    }

    pub fn requests(&self) -> Vec<RepairRequest> {
        lock(&self.requests).clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }
}

impl RepairAgent for ScriptedAgent {
    fn repair(&self, request: &RepairRequest) -> Result<()> {
        lock(&self.requests).push(request.clone());
        let next = lock(&self.script)
            .pop_front()
            .ok_or_else(|| anyhow!("unexpected agent call for {}", request.target))?;
        match next {
            ScriptedRepair::Ok => Ok(()),
            ScriptedRepair::Fail(message) => Err(anyhow!(message)),
            ScriptedRepair::Write { path, contents } => {
                let path = request.workdir.join(path);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
            }
        }
    }
}

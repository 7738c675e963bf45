//! Bazel adapter for target validation and module bootstrap.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::{CommandOutput, run_command_with_timeout};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Outcome of a `query` or `build` invocation.
///
/// A failing query or build is a normal result, not an error: only a failure
/// to run Bazel at all surfaces as `Err` from [`BuildSystem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub passed: bool,
    pub timed_out: bool,
    /// Combined stdout/stderr of the invocation.
    pub diagnostic: String,
}

impl Validation {
    pub fn pass() -> Self {
        Self {
            passed: true,
            timed_out: false,
            diagnostic: String::new(),
        }
    }

    pub fn fail(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: false,
            timed_out: false,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            passed: false,
            timed_out: true,
            diagnostic: "[timed out]".to_string(),
        }
    }

    fn from_output(output: &CommandOutput) -> Self {
        Self {
            passed: output.success(),
            timed_out: output.timed_out,
            diagnostic: output.combined(),
        }
    }
}

/// Target resolution and build execution.
pub trait BuildSystem: Send + Sync {
    /// Check that `target` resolves in the workspace at `workdir`.
    fn query(&self, workdir: &Path, target: &str) -> Result<Validation>;
    /// Build `target` in the workspace at `workdir`.
    fn build(&self, workdir: &Path, target: &str) -> Result<Validation>;
}

/// Module-level Bazel operations used by `bld bootstrap`.
pub trait ModuleResolver {
    /// Resolve the module graph (`bazel mod explain`), writing `MODULE.bazel.lock`.
    fn mod_explain(&self, workdir: &Path) -> Result<()>;
    /// Number of targets matched by `//...`.
    fn count_targets(&self, workdir: &Path) -> Result<usize>;
}

/// Command the repair agent runs to check its own work.
pub fn build_command(target: &str) -> String {
    format!("bazel build {target}")
}

/// [`BuildSystem`] backed by the `bazel` CLI.
#[derive(Debug, Clone)]
pub struct Bazel {
    query_timeout: Duration,
    build_timeout: Duration,
    output_limit_bytes: usize,
}

impl Bazel {
    pub fn new(query_timeout: Duration, build_timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            query_timeout,
            build_timeout,
            output_limit_bytes,
        }
    }

    fn run(&self, workdir: &Path, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let mut cmd = Command::new("bazel");
        cmd.args(args).current_dir(workdir);
        run_command_with_timeout(cmd, timeout, self.output_limit_bytes)
            .with_context(|| format!("run bazel {}", args.join(" ")))
    }
}

impl BuildSystem for Bazel {
    #[instrument(skip_all, fields(target = %target))]
    fn query(&self, workdir: &Path, target: &str) -> Result<Validation> {
        let output = self.run(workdir, &["query", target], self.query_timeout)?;
        Ok(Validation::from_output(&output))
    }

    #[instrument(skip_all, fields(target = %target))]
    fn build(&self, workdir: &Path, target: &str) -> Result<Validation> {
        let output = self.run(workdir, &["build", target], self.build_timeout)?;
        Ok(Validation::from_output(&output))
    }
}

impl ModuleResolver for Bazel {
    fn mod_explain(&self, workdir: &Path) -> Result<()> {
        let output = self.run(workdir, &["mod", "explain"], self.query_timeout)?;
        if !output.success() {
            return Err(anyhow!("'bazel mod explain' failed: {}", output.combined()));
        }
        Ok(())
    }

    fn count_targets(&self, workdir: &Path) -> Result<usize> {
        let output = self.run(workdir, &["query", "//..."], self.query_timeout)?;
        if !output.success() {
            return Err(anyhow!("'bazel query //...' failed: {}", output.combined()));
        }
        let count = count_lines(&output.stdout_text());
        debug!(count, "counted targets");
        Ok(count)
    }
}

fn count_lines(stdout: &str) -> usize {
    stdout.lines().filter(|line| !line.trim().is_empty()).count()
}

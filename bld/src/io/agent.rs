//! Repair agent abstraction.
//!
//! The [`RepairAgent`] trait decouples the repair loop from the actual agent
//! backend (currently `aider`). The agent edits files in the worktree in place;
//! whether the target builds afterwards is checked separately by Bazel, so the
//! only thing trusted from the agent is whether its process ran successfully.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::config::AgentConfig;
use crate::io::process::run_command_with_timeout;

pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Parameters for one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairRequest {
    /// Worktree the agent edits.
    pub workdir: PathBuf,
    /// Model identifier passed to the agent.
    pub model: String,
    pub target: String,
    /// Natural-language instruction for the agent.
    pub instruction: String,
    /// Command the agent may run to check its own work.
    pub test_command: String,
    /// Files to open in the agent session, relative to `workdir`.
    pub files: Vec<PathBuf>,
    /// Maximum time to wait for the agent to complete.
    pub timeout: Duration,
}

/// Abstraction over code-repair agent backends.
pub trait RepairAgent: Send + Sync {
    /// Run the agent. `Err` means the agent process itself could not run to completion.
    fn repair(&self, request: &RepairRequest) -> Result<()>;
}

/// Agent that spawns `aider`.
#[derive(Debug, Clone)]
pub struct AiderAgent {
    program: String,
    edit_format: String,
    output_limit_bytes: usize,
}

impl AiderAgent {
    pub fn new(config: &AgentConfig, output_limit_bytes: usize) -> Self {
        Self {
            program: config.command.clone(),
            edit_format: config.edit_format.clone(),
            output_limit_bytes,
        }
    }

    /// Build the aider command line for `request`.
    pub fn command(&self, request: &RepairRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--no-auto-commits")
            .arg("--disable-playwright")
            .arg("--yes-always")
            .arg("--model")
            .arg(&request.model)
            .arg("--edit-format")
            .arg(&self.edit_format)
            .arg("--auto-test")
            .arg("--test-cmd")
            .arg(&request.test_command)
            .arg("--message")
            .arg(&request.instruction)
            .args(&request.files)
            .current_dir(&request.workdir);
        cmd
    }
}

impl RepairAgent for AiderAgent {
    #[instrument(skip_all, fields(model = %request.model, target = %request.target, timeout_secs = request.timeout.as_secs()))]
    fn repair(&self, request: &RepairRequest) -> Result<()> {
        info!(workdir = %request.workdir.display(), "starting repair agent");
        let output = run_command_with_timeout(
            self.command(request),
            request.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run {}", self.program))?;

        if output.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "repair agent timed out"
            );
            return Err(anyhow!(
                "{} timed out after {:?}",
                self.program,
                request.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "repair agent failed");
            return Err(anyhow!(
                "{} failed with status {:?}: {}",
                self.program,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        debug!("repair agent completed successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn sample_request(workdir: PathBuf) -> RepairRequest {
        RepairRequest {
            workdir,
            model: "openrouter/openai/gpt-5".to_string(),
            target: "//crates/globset:globset".to_string(),
            instruction: "make it build".to_string(),
            test_command: "bazel build //crates/globset:globset".to_string(),
            files: vec![
                PathBuf::from("MODULE.bazel"),
                PathBuf::from("crates/globset/BUILD.bazel"),
            ],
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn aider_command_carries_model_test_cmd_and_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = AiderAgent::new(&AgentConfig::default(), 1000);
        let cmd = agent.command(&sample_request(temp.path().to_path_buf()));

        assert_eq!(cmd.get_program(), OsStr::new("aider"));
        let args: Vec<&OsStr> = cmd.get_args().collect();
        let pos = |flag: &str| {
            args.iter()
                .position(|a| *a == OsStr::new(flag))
                .unwrap_or_else(|| panic!("missing {flag}"))
        };
        assert_eq!(args[pos("--model") + 1], "openrouter/openai/gpt-5");
        assert_eq!(args[pos("--edit-format") + 1], "diff");
        assert_eq!(
            args[pos("--test-cmd") + 1],
            "bazel build //crates/globset:globset"
        );
        assert_eq!(args[pos("--message") + 1], "make it build");
        assert!(args.contains(&OsStr::new("--no-auto-commits")));
        assert_eq!(
            &args[args.len() - 2..],
            &[
                OsStr::new("MODULE.bazel"),
                OsStr::new("crates/globset/BUILD.bazel")
            ]
        );
        assert_eq!(cmd.get_current_dir(), Some(temp.path()));
    }

    #[test]
    fn nonzero_exit_is_an_invocation_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = AiderAgent::new(
            &AgentConfig {
                command: "false".to_string(),
                ..AgentConfig::default()
            },
            1000,
        );
        let err = agent
            .repair(&sample_request(temp.path().to_path_buf()))
            .unwrap_err();
        assert!(err.to_string().contains("false failed with status"));
    }

    #[cfg(unix)]
    #[test]
    fn hung_agent_is_killed_at_request_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("stuck-aider");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        let agent = AiderAgent::new(
            &AgentConfig {
                command: script.display().to_string(),
                ..AgentConfig::default()
            },
            1000,
        );
        let request = RepairRequest {
            timeout: Duration::from_millis(300),
            ..sample_request(temp.path().to_path_buf())
        };

        let started = std::time::Instant::now();
        let err = agent.repair(&request).unwrap_err();

        assert!(err.to_string().contains("timed out"), "{err:#}");
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "returned after {:?}",
            started.elapsed()
        );
    }
}

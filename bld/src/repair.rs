//! The bounded repair loop for one target in one session.
//!
//! ```text
//! SCAFFOLD -> PRECHECK --pass--> SUCCESS (no agent call)
//!                |
//!              fail
//!                v
//! ATTEMPT(n): agent -> query -> build --pass--> stage/status/commit -> SUCCESS
//!                        |        |
//!                      fail     fail
//!                        v        v
//!                      stash -> ATTEMPT(n+1), or EXHAUSTED after MAX_ATTEMPTS
//! ```
//!
//! Failed validations are retryable and never leave this module. Everything
//! else is reported as [`RepairOutcome::Fatal`] with the scope the
//! orchestrator needs to decide between a per-model short-circuit and a
//! run-wide abort.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, info_span, warn};

use crate::core::label::files_to_consider;
use crate::core::types::{
    AttemptRecord, AttemptResult, FatalScope, MAX_ATTEMPTS, RepairOutcome, Session,
};
use crate::io::agent::{DEFAULT_AGENT_TIMEOUT, RepairAgent, RepairRequest};
use crate::io::bazel::{BuildSystem, build_command};
use crate::io::config::BldConfig;
use crate::io::descriptor::ensure_build_file;
use crate::io::git::{StashOutcome, VersionControl};
use crate::io::prompt::PromptEngine;

/// Policy knobs for [`RepairLoop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairPolicy {
    pub max_attempts: u32,
    pub agent_timeout: Duration,
    pub scaffold_build_files: bool,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
            scaffold_build_files: true,
        }
    }
}

impl RepairPolicy {
    pub fn from_config(cfg: &BldConfig) -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            agent_timeout: cfg.timeouts.agent(),
            scaffold_build_files: cfg.scaffold_build_files,
        }
    }
}

/// Commit message recorded for a successful repair.
pub fn commit_message(model: &str, target: &str) -> String {
    format!("bld: model {model} target {target}")
}

/// Stash label used when rolling back a failed attempt.
pub fn stash_label(target: &str, attempt: u32) -> String {
    format!("bld-temp-stash target {target} attempt {attempt}")
}

/// Repairs one target at a time inside a session's worktree.
pub struct RepairLoop<'a, V, B, A> {
    vcs: &'a V,
    build: &'a B,
    agent: &'a A,
    prompts: PromptEngine,
    policy: RepairPolicy,
}

impl<'a, V, B, A> RepairLoop<'a, V, B, A>
where
    V: VersionControl,
    B: BuildSystem,
    A: RepairAgent,
{
    pub fn new(vcs: &'a V, build: &'a B, agent: &'a A, policy: RepairPolicy) -> Self {
        Self {
            vcs,
            build,
            agent,
            prompts: PromptEngine::new(),
            policy,
        }
    }

    /// Run the loop for `target` in `session` until it succeeds, exhausts, or hits a fatal error.
    pub fn run(&self, session: &Session, target: &str) -> RepairOutcome {
        let span = info_span!("repair", model = %session.model, target = %target);
        let _enter = span.enter();

        let outcome = self.run_inner(session, target);
        match &outcome {
            RepairOutcome::Success { attempt, committed } => {
                info!(attempt, committed, "target builds");
            }
            RepairOutcome::Exhausted {
                attempts,
                last_diagnostic,
            } => {
                warn!(attempts, last_diagnostic = %last_diagnostic, "maximum attempts reached");
            }
            RepairOutcome::Fatal(err) => {
                warn!(scope = ?err.scope, reason = %err.reason, "repair loop failed");
            }
        }
        outcome
    }

    fn run_inner(&self, session: &Session, target: &str) -> RepairOutcome {
        if self.policy.scaffold_build_files
            && let Err(err) = ensure_build_file(&session.worktree, target)
        {
            return RepairOutcome::fatal(
                FatalScope::Target,
                format!("ensure BUILD.bazel for target {target}: {err:#}"),
            );
        }

        if self.precheck(session, target) {
            info!("bazel query and build succeeded; skipping repair agent");
            return RepairOutcome::Success {
                attempt: 0,
                committed: false,
            };
        }

        let instruction = match self.prompts.render_repair(target) {
            Ok(text) => text,
            Err(err) => {
                return RepairOutcome::fatal(
                    FatalScope::Run,
                    format!("render repair instruction: {err:#}"),
                );
            }
        };
        let request = RepairRequest {
            workdir: session.worktree.clone(),
            model: session.model.clone(),
            target: target.to_string(),
            instruction,
            test_command: build_command(target),
            files: files_to_consider(target),
            timeout: self.policy.agent_timeout,
        };

        let max_attempts = self.policy.max_attempts;
        let mut last_diagnostic = String::new();
        for attempt in 1..=max_attempts {
            let span = info_span!("attempt", attempt);
            let _enter = span.enter();

            if let Err(err) = self.agent.repair(&request) {
                return RepairOutcome::fatal(
                    FatalScope::Run,
                    format!(
                        "repair agent failed for model {} target {target} (attempt {attempt}/{max_attempts}): {err:#}",
                        session.model
                    ),
                );
            }
            debug!(attempt, max_attempts, "repair agent completed");

            let record = match self.validate(session, target, attempt) {
                Ok(record) => record,
                Err(err) => {
                    let mut reason = format!("validate target {target} (attempt {attempt}): {err:#}");
                    if let Err(stash_err) = self.rollback(session, target, attempt) {
                        reason.push_str(&format!("; {stash_err:#}"));
                    }
                    return RepairOutcome::fatal(FatalScope::Target, reason);
                }
            };

            if record.result == AttemptResult::Succeeded {
                return match self.record_success(session, target) {
                    Ok(committed) => RepairOutcome::Success { attempt, committed },
                    Err(err) => RepairOutcome::fatal(
                        FatalScope::Run,
                        format!("record repair of {target} in {}: {err:#}", session.worktree.display()),
                    ),
                };
            }

            warn!(
                attempt = record.attempt,
                max_attempts,
                result = ?record.result,
                timed_out = record.timed_out,
                diagnostic = %record.diagnostic,
                "validation failed; rolling back"
            );
            last_diagnostic = record.diagnostic;

            if let Err(err) = self.rollback(session, target, attempt) {
                return RepairOutcome::fatal(FatalScope::Target, format!("{err:#}"));
            }
        }

        RepairOutcome::Exhausted {
            attempts: max_attempts,
            last_diagnostic,
        }
    }

    /// Attempt 0: query then build without the agent. Never fatal.
    fn precheck(&self, session: &Session, target: &str) -> bool {
        let span = info_span!("attempt", attempt = 0u32);
        let _enter = span.enter();
        match self.validate(session, target, 0) {
            Ok(record) if record.result == AttemptResult::Succeeded => true,
            Ok(record) => {
                info!(
                    attempt = record.attempt,
                    result = ?record.result,
                    timed_out = record.timed_out,
                    diagnostic = %record.diagnostic,
                    "precheck failed"
                );
                false
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "precheck could not run bazel");
                false
            }
        }
    }

    /// Query, then build only if the query resolved.
    fn validate(&self, session: &Session, target: &str, attempt: u32) -> Result<AttemptRecord> {
        let query = self
            .build
            .query(&session.worktree, target)
            .with_context(|| format!("bazel query {target}"))?;
        if !query.passed {
            return Ok(AttemptRecord {
                attempt,
                result: AttemptResult::QueryFailed,
                timed_out: query.timed_out,
                diagnostic: query.diagnostic,
            });
        }
        let build = self
            .build
            .build(&session.worktree, target)
            .with_context(|| format!("bazel build {target}"))?;
        if !build.passed {
            return Ok(AttemptRecord {
                attempt,
                result: AttemptResult::BuildFailed,
                timed_out: build.timed_out,
                diagnostic: build.diagnostic,
            });
        }
        Ok(AttemptRecord {
            attempt,
            result: AttemptResult::Succeeded,
            timed_out: false,
            diagnostic: String::new(),
        })
    }

    /// Stash everything the attempt left in the worktree.
    fn rollback(&self, session: &Session, target: &str, attempt: u32) -> Result<()> {
        let outcome = self
            .vcs
            .stash_all(&session.worktree, &stash_label(target, attempt))
            .with_context(|| format!("git stash failed in {}", session.worktree.display()))?;
        match outcome {
            StashOutcome::Stashed => debug!("stashed attempt changes"),
            StashOutcome::NothingToStash => debug!("nothing to stash"),
        }
        Ok(())
    }

    /// Stage and commit the worktree. Returns false when there was nothing to commit.
    fn record_success(&self, session: &Session, target: &str) -> Result<bool> {
        let worktree = &session.worktree;
        self.vcs.stage_all(worktree).context("git add")?;
        if self.vcs.status_is_clean(worktree).context("git status")? {
            info!(worktree = %worktree.display(), "no changes to commit");
            return Ok(false);
        }
        let message = commit_message(&session.model, target);
        self.vcs.commit(worktree, &message).context("git commit")?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bazel::Validation;
    use crate::test_support::{
        ScriptedAgent, ScriptedBuild, ScriptedRepair, ScriptedStash, ScriptedVcs, scratch_session,
    };

    #[test]
    fn precheck_success_skips_agent() {
        let (_temp, session) = scratch_session("m1");
        let vcs = ScriptedVcs::new("main");
        let build = ScriptedBuild::new()
            .query("t1", vec![Validation::pass()])
            .build("t1", vec![Validation::pass()]);
        let agent = ScriptedAgent::new(Vec::new());
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());

        let outcome = repair.run(&session, "t1");

        assert_eq!(
            outcome,
            RepairOutcome::Success {
                attempt: 0,
                committed: false
            }
        );
        assert_eq!(agent.calls(), 0);
        assert!(vcs.snapshot().stashes.is_empty());
    }

    #[test]
    fn precheck_build_failure_falls_through_to_attempt_one() {
        let (_temp, session) = scratch_session("m1");
        let vcs = ScriptedVcs::new("main").dirty();
        let build = ScriptedBuild::new()
            .query("t1", vec![Validation::pass(), Validation::pass()])
            .build("t1", vec![Validation::fail("missing dep"), Validation::pass()]);
        let agent = ScriptedAgent::succeeding(1);
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());

        let outcome = repair.run(&session, "t1");

        assert_eq!(
            outcome,
            RepairOutcome::Success {
                attempt: 1,
                committed: true
            }
        );
        assert_eq!(agent.calls(), 1);
        build.assert_drained().expect("build drained");
    }

    #[test]
    fn agent_request_carries_instruction_and_files() {
        let (_temp, session) = scratch_session("openrouter/qwen/qwen3-coder");
        let vcs = ScriptedVcs::new("main");
        let target = "//crates/regex:grep_regex";
        let build = ScriptedBuild::new()
            .query(target, vec![Validation::fail("no such package"), Validation::pass()])
            .build(target, vec![Validation::pass()]);
        let agent = ScriptedAgent::succeeding(1);
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());

        repair.run(&session, target);

        let requests = agent.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.model, "openrouter/qwen/qwen3-coder");
        assert_eq!(request.workdir, session.worktree);
        assert_eq!(request.test_command, "bazel build //crates/regex:grep_regex");
        assert!(request.instruction.contains(target));
        assert_eq!(
            request.files,
            vec![
                std::path::PathBuf::from("MODULE.bazel"),
                std::path::PathBuf::from("crates/regex/BUILD.bazel"),
            ]
        );
    }

    #[test]
    fn scaffolds_missing_build_file_before_precheck() {
        let (_temp, session) = scratch_session("m1");
        let vcs = ScriptedVcs::new("main");
        let build = ScriptedBuild::new()
            .query("//crates/cli:grep_cli", vec![Validation::pass()])
            .build("//crates/cli:grep_cli", vec![Validation::pass()]);
        let agent = ScriptedAgent::new(Vec::new());
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());

        repair.run(&session, "//crates/cli:grep_cli");

        assert!(session.worktree.join("crates/cli/BUILD.bazel").exists());
    }

    #[test]
    fn scaffold_can_be_disabled() {
        let (_temp, session) = scratch_session("m1");
        let vcs = ScriptedVcs::new("main");
        let build = ScriptedBuild::new()
            .query("//:ripgrep", vec![Validation::pass()])
            .build("//:ripgrep", vec![Validation::pass()]);
        let agent = ScriptedAgent::new(Vec::new());
        let policy = RepairPolicy {
            scaffold_build_files: false,
            ..RepairPolicy::default()
        };
        let repair = RepairLoop::new(&vcs, &build, &agent, policy);

        repair.run(&session, "//:ripgrep");

        assert!(!session.worktree.join("BUILD.bazel").exists());
    }

    #[test]
    fn agent_failure_is_run_fatal() {
        let (_temp, session) = scratch_session("m1");
        let vcs = ScriptedVcs::new("main");
        let build = ScriptedBuild::new().query("t1", vec![Validation::fail("unknown")]);
        let agent = ScriptedAgent::new(vec![ScriptedRepair::Fail("aider exited 1".to_string())]);
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());

        let outcome = repair.run(&session, "t1");

        let RepairOutcome::Fatal(err) = outcome else {
            panic!("expected fatal outcome, got {outcome:?}");
        };
        assert_eq!(err.scope, FatalScope::Run);
        assert!(err.reason.contains("aider exited 1"));
        assert!(err.reason.contains("attempt 1/5"));
        assert!(vcs.snapshot().stashes.is_empty());
    }

    #[test]
    fn stash_failure_is_target_fatal() {
        let (_temp, session) = scratch_session("m1");
        let vcs = ScriptedVcs::new("main").with_stash_results(vec![ScriptedStash::Fail]);
        let build = ScriptedBuild::new().query(
            "t1",
            vec![Validation::fail("unknown"), Validation::fail("still unknown")],
        );
        let agent = ScriptedAgent::succeeding(1);
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());

        let outcome = repair.run(&session, "t1");

        let RepairOutcome::Fatal(err) = outcome else {
            panic!("expected fatal outcome, got {outcome:?}");
        };
        assert_eq!(err.scope, FatalScope::Target);
        assert!(err.reason.contains("git stash failed"));
        assert_eq!(agent.calls(), 1);
    }

    #[test]
    fn commit_failure_is_run_fatal() {
        let (_temp, session) = scratch_session("m1");
        let vcs = ScriptedVcs::new("main").dirty().failing_commit();
        let build = ScriptedBuild::new()
            .query("t1", vec![Validation::fail("unknown"), Validation::pass()])
            .build("t1", vec![Validation::pass()]);
        let agent = ScriptedAgent::succeeding(1);
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());

        let outcome = repair.run(&session, "t1");

        let RepairOutcome::Fatal(err) = outcome else {
            panic!("expected fatal outcome, got {outcome:?}");
        };
        assert_eq!(err.scope, FatalScope::Run);
        assert!(err.reason.contains("git commit"));
    }

    #[test]
    fn clean_status_skips_commit() {
        let (_temp, session) = scratch_session("m1");
        let vcs = ScriptedVcs::new("main");
        let build = ScriptedBuild::new()
            .query("t1", vec![Validation::fail("unknown"), Validation::pass()])
            .build("t1", vec![Validation::pass()]);
        let agent = ScriptedAgent::succeeding(1);
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());

        let outcome = repair.run(&session, "t1");

        assert_eq!(
            outcome,
            RepairOutcome::Success {
                attempt: 1,
                committed: false
            }
        );
        let state = vcs.snapshot();
        assert_eq!(state.stage_calls, 1);
        assert!(state.commits.is_empty());
    }

    #[test]
    fn validation_timeout_is_retryable() {
        let (_temp, session) = scratch_session("m1");
        let vcs = ScriptedVcs::new("main").dirty();
        let build = ScriptedBuild::new()
            .query(
                "t1",
                vec![Validation::fail("unknown"), Validation::pass(), Validation::pass()],
            )
            .build("t1", vec![Validation::timeout(), Validation::pass()]);
        let agent = ScriptedAgent::succeeding(2);
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());

        let outcome = repair.run(&session, "t1");

        assert_eq!(
            outcome,
            RepairOutcome::Success {
                attempt: 2,
                committed: true
            }
        );
        assert_eq!(vcs.snapshot().stashes.len(), 1);
    }

    #[test]
    fn build_system_error_after_agent_is_target_fatal() {
        let (_temp, session) = scratch_session("m1");
        let vcs = ScriptedVcs::new("main");
        // One scripted query for the precheck; the post-agent query finds the queue empty.
        let build = ScriptedBuild::new().query("t1", vec![Validation::fail("unknown")]);
        let agent = ScriptedAgent::succeeding(1);
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());

        let outcome = repair.run(&session, "t1");

        let RepairOutcome::Fatal(err) = outcome else {
            panic!("expected fatal outcome, got {outcome:?}");
        };
        assert_eq!(err.scope, FatalScope::Target);
        assert!(err.reason.contains("bazel query t1"));
        let stashes = vcs.snapshot().stashes;
        assert_eq!(stashes.len(), 1);
        assert_eq!(stashes[0].1, "bld-temp-stash target t1 attempt 1");
    }

    #[test]
    fn build_system_error_reports_failed_rollback() {
        let (_temp, session) = scratch_session("m1");
        let vcs = ScriptedVcs::new("main").with_stash_results(vec![ScriptedStash::Fail]);
        let build = ScriptedBuild::new().query("t1", vec![Validation::fail("unknown")]);
        let agent = ScriptedAgent::succeeding(1);
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());

        let outcome = repair.run(&session, "t1");

        let RepairOutcome::Fatal(err) = outcome else {
            panic!("expected fatal outcome, got {outcome:?}");
        };
        assert_eq!(err.scope, FatalScope::Target);
        assert!(err.reason.contains("bazel query t1"));
        assert!(err.reason.contains("git stash failed"));
    }

    #[test]
    fn precheck_bazel_error_is_not_fatal() {
        let (_temp, session) = scratch_session("m1");
        let vcs = ScriptedVcs::new("main").dirty();
        let build = ScriptedBuild::new()
            .query("t1", vec![Validation::pass()])
            .build("t1", vec![Validation::pass()])
            .failing_next_query("t1");
        let agent = ScriptedAgent::succeeding(1);
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());

        let outcome = repair.run(&session, "t1");

        assert_eq!(
            outcome,
            RepairOutcome::Success {
                attempt: 1,
                committed: true
            }
        );
    }

    #[test]
    fn commit_message_names_model_and_target() {
        assert_eq!(
            commit_message("openrouter/x-ai/grok-4", "//:ripgrep"),
            "bld: model openrouter/x-ai/grok-4 target //:ripgrep"
        );
    }
}

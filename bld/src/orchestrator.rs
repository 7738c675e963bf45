//! Drives every configured model through every configured target.
//!
//! Models run in configuration order, optionally in batches of
//! `parallel_models` concurrent sessions. Within a model, targets run strictly
//! in order and the first non-success outcome abandons the rest of that
//! model's targets. Session failures and run-scoped fatal outcomes abort the
//! whole run.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use chrono::Utc;
use tracing::{error, info, info_span, warn};

use crate::core::types::{FatalScope, RepairOutcome, TargetReport, TargetStatus};
use crate::io::agent::RepairAgent;
use crate::io::bazel::BuildSystem;
use crate::io::git::VersionControl;
use crate::io::report::RunReport;
use crate::repair::RepairLoop;
use crate::session::SessionManager;

/// Run-wide abort flag shared between model workers.
#[derive(Debug, Default)]
struct AbortSignal {
    aborted: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl AbortSignal {
    fn is_set(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Record `reason` unless an earlier abort already did.
    fn trigger(&self, reason: String) {
        let mut slot = self
            .reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            error!(reason = %reason, "aborting run");
            *slot = Some(reason);
        }
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn into_reason(self) -> Option<String> {
        self.reason
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct Orchestrator<'a, V: VersionControl, B, A> {
    sessions: &'a SessionManager<'a, V>,
    repair: &'a RepairLoop<'a, V, B, A>,
    models: Vec<String>,
    targets: Vec<String>,
    parallel_models: usize,
}

impl<'a, V, B, A> Orchestrator<'a, V, B, A>
where
    V: VersionControl,
    B: BuildSystem,
    A: RepairAgent,
{
    pub fn new(
        sessions: &'a SessionManager<'a, V>,
        repair: &'a RepairLoop<'a, V, B, A>,
        models: Vec<String>,
        targets: Vec<String>,
    ) -> Self {
        Self {
            sessions,
            repair,
            models,
            targets,
            parallel_models: 1,
        }
    }

    /// Run up to `n` models at once. Values below 1 are treated as 1.
    pub fn with_parallel_models(mut self, n: usize) -> Self {
        self.parallel_models = n.max(1);
        self
    }

    pub fn run(&self) -> RunReport {
        let started_at = Utc::now().to_rfc3339();
        info!(
            models = self.models.len(),
            targets = self.targets.len(),
            parallel_models = self.parallel_models,
            "starting run"
        );

        let abort = AbortSignal::default();
        let mut targets = Vec::with_capacity(self.models.len() * self.targets.len());
        for batch in self.models.chunks(self.parallel_models) {
            if let [model] = batch {
                targets.extend(self.run_model(model, &abort));
                continue;
            }
            let signal = &abort;
            let results: Vec<Vec<TargetReport>> = thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|model| (model, scope.spawn(move || self.run_model(model, signal))))
                    .collect();
                handles
                    .into_iter()
                    .map(|(model, handle)| {
                        handle.join().unwrap_or_else(|_| {
                            signal.trigger(format!("worker for model {model} panicked"));
                            self.not_attempted(model, 0)
                        })
                    })
                    .collect()
            });
            targets.extend(results.into_iter().flatten());
        }

        let report = RunReport {
            started_at,
            finished_at: Utc::now().to_rfc3339(),
            aborted: abort.into_reason(),
            targets,
        };
        info!(
            success = report.count("success"),
            exhausted = report.count("exhausted"),
            fatal = report.count("fatal"),
            not_attempted = report.count("not_attempted"),
            "run finished"
        );
        report
    }

    /// One model's session and target sequence. Always yields one report per target.
    fn run_model(&self, model: &str, abort: &AbortSignal) -> Vec<TargetReport> {
        let span = info_span!("model", model);
        let _enter = span.enter();

        if abort.is_set() {
            return self.not_attempted(model, 0);
        }
        let session = match self.sessions.ensure(model) {
            Ok(session) => session,
            Err(err) => {
                abort.trigger(format!("ensure session for model {model}: {err:#}"));
                return self.not_attempted(model, 0);
            }
        };
        info!(branch = %session.branch, worktree = %session.worktree.display(), "session ready");

        let mut reports = Vec::with_capacity(self.targets.len());
        for (index, target) in self.targets.iter().enumerate() {
            if abort.is_set() {
                reports.extend(self.not_attempted(model, index));
                break;
            }
            let outcome = self.repair.run(&session, target);
            reports.push(TargetReport::new(model, target, TargetStatus::from(&outcome)));
            match outcome {
                RepairOutcome::Success { .. } => {}
                RepairOutcome::Exhausted { .. } => {
                    warn!(target = %target, "abandoning remaining targets for model");
                    reports.extend(self.not_attempted(model, index + 1));
                    break;
                }
                RepairOutcome::Fatal(err) => {
                    if err.scope == FatalScope::Run {
                        abort.trigger(err.reason);
                    } else {
                        warn!(target = %target, "abandoning remaining targets for model");
                    }
                    reports.extend(self.not_attempted(model, index + 1));
                    break;
                }
            }
        }
        reports
    }

    fn not_attempted(&self, model: &str, from: usize) -> Vec<TargetReport> {
        self.targets[from..]
            .iter()
            .map(|target| TargetReport::not_attempted(model, target))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bazel::Validation;
    use crate::repair::RepairPolicy;
    use crate::test_support::{ScriptedAgent, ScriptedBuild, ScriptedRepair, ScriptedVcs};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn statuses(report: &RunReport) -> Vec<(String, String, &'static str)> {
        report
            .targets
            .iter()
            .map(|t| (t.model.clone(), t.target.clone(), t.status.as_str()))
            .collect()
    }

    #[test]
    fn exhaustion_skips_rest_of_model_and_moves_on() {
        let temp = tempfile::tempdir().expect("tempdir");
        let vcs = ScriptedVcs::new("main");
        // m1: t3 fails precheck and all five attempts; m2: t3 and t4 already build.
        let t3_queries = vec![Validation::pass(); 7];
        let mut t3_builds = vec![Validation::fail("error: linker failed"); 6];
        t3_builds.push(Validation::pass());
        let build = ScriptedBuild::new()
            .query("t3", t3_queries)
            .build("t3", t3_builds)
            .query("t4", vec![Validation::pass()])
            .build("t4", vec![Validation::pass()]);
        let agent = ScriptedAgent::succeeding(5);
        let sessions = SessionManager::new(&vcs, "/repo", "main", temp.path());
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());
        let orchestrator =
            Orchestrator::new(&sessions, &repair, strings(&["m1", "m2"]), strings(&["t3", "t4"]));

        let report = orchestrator.run();

        assert_eq!(
            statuses(&report),
            vec![
                ("m1".to_string(), "t3".to_string(), "exhausted"),
                ("m1".to_string(), "t4".to_string(), "not_attempted"),
                ("m2".to_string(), "t3".to_string(), "success"),
                ("m2".to_string(), "t4".to_string(), "success"),
            ]
        );
        assert!(report.aborted.is_none());
        assert_eq!(agent.calls(), 5);
        build.assert_drained().expect("drained");
    }

    #[test]
    fn session_failure_aborts_every_model() {
        let temp = tempfile::tempdir().expect("tempdir");
        let vcs = ScriptedVcs::new("main").failing_add_worktree(temp.path().join("main-m1"));
        let build = ScriptedBuild::new();
        let agent = ScriptedAgent::default();
        let sessions = SessionManager::new(&vcs, "/repo", "main", temp.path());
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());
        let orchestrator =
            Orchestrator::new(&sessions, &repair, strings(&["m1", "m2"]), strings(&["t1"]));

        let report = orchestrator.run();

        assert_eq!(report.count("not_attempted"), 2);
        let reason = report.aborted.as_deref().expect("aborted");
        assert!(reason.contains("ensure session for model m1"));
        assert_eq!(vcs.snapshot().added_worktrees.len(), 0);
        assert_eq!(agent.calls(), 0);
    }

    #[test]
    fn run_fatal_outcome_aborts_remaining_models() {
        let temp = tempfile::tempdir().expect("tempdir");
        let vcs = ScriptedVcs::new("main");
        let build = ScriptedBuild::new().query("t1", vec![Validation::fail("no such target")]);
        let agent = ScriptedAgent::new(vec![ScriptedRepair::Fail("aider: not found".to_string())]);
        let sessions = SessionManager::new(&vcs, "/repo", "main", temp.path());
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());
        let orchestrator = Orchestrator::new(
            &sessions,
            &repair,
            strings(&["m1", "m2"]),
            strings(&["t1", "t2"]),
        );

        let report = orchestrator.run();

        assert_eq!(
            statuses(&report),
            vec![
                ("m1".to_string(), "t1".to_string(), "fatal"),
                ("m1".to_string(), "t2".to_string(), "not_attempted"),
                ("m2".to_string(), "t1".to_string(), "not_attempted"),
                ("m2".to_string(), "t2".to_string(), "not_attempted"),
            ]
        );
        assert!(report.aborted.as_deref().unwrap_or_default().contains("aider: not found"));
        // The aborted model never gets a session.
        assert_eq!(vcs.snapshot().created_branches, vec!["main-m1".to_string()]);
    }

    #[test]
    fn parallel_models_report_in_configuration_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let vcs = ScriptedVcs::new("main");
        let build = ScriptedBuild::new()
            .query("t1", vec![Validation::pass(); 3])
            .build("t1", vec![Validation::pass(); 3]);
        let agent = ScriptedAgent::default();
        let sessions = SessionManager::new(&vcs, "/repo", "main", temp.path());
        let repair = RepairLoop::new(&vcs, &build, &agent, RepairPolicy::default());
        let orchestrator = Orchestrator::new(
            &sessions,
            &repair,
            strings(&["m1", "m2", "m3"]),
            strings(&["t1"]),
        )
        .with_parallel_models(2);

        let report = orchestrator.run();

        let models: Vec<&str> = report.targets.iter().map(|t| t.model.as_str()).collect();
        assert_eq!(models, vec!["m1", "m2", "m3"]);
        assert_eq!(report.count("success"), 3);
        assert_eq!(vcs.snapshot().added_worktrees.len(), 3);
    }
}

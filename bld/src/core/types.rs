//! Shared types for sessions, repair attempts, and run reporting.

use std::path::PathBuf;

use serde::Serialize;

/// Repair attempts per (model, target) pair, not counting the precheck.
pub const MAX_ATTEMPTS: u32 = 5;

/// A model's isolated branch and worktree for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// Effective model identifier passed to the repair agent.
    pub model: String,
    /// Branch checked out in the worktree.
    pub branch: String,
    /// Worktree directory owned by this session.
    pub worktree: PathBuf,
}

/// Validation result of a single repair attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    QueryFailed,
    BuildFailed,
    Succeeded,
}

/// One agent invocation plus validation. Only lives for the duration of a loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based attempt number (the precheck is attempt 0).
    pub attempt: u32,
    pub result: AttemptResult,
    /// The failing query or build hit its timeout.
    pub timed_out: bool,
    /// Captured output of the failing query/build, empty on success.
    pub diagnostic: String,
}

/// How far a fatal error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalScope {
    /// Ends the current target and the rest of the model's targets.
    Target,
    /// Aborts the whole run.
    Run,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    pub scope: FatalScope,
    pub reason: String,
}

/// Terminal state of a repair loop for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The target builds. `attempt` is 0 when the precheck already passed.
    Success { attempt: u32, committed: bool },
    /// Every attempt failed validation.
    Exhausted {
        attempts: u32,
        last_diagnostic: String,
    },
    Fatal(FatalError),
}

impl RepairOutcome {
    pub fn fatal(scope: FatalScope, reason: impl Into<String>) -> Self {
        Self::Fatal(FatalError {
            scope,
            reason: reason.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Reported status of one (model, target) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetStatus {
    Success {
        attempt: u32,
        committed: bool,
    },
    Exhausted {
        attempts: u32,
    },
    Fatal {
        scope: FatalScope,
        reason: String,
    },
    /// Skipped because an earlier target of the same model failed, or the run aborted.
    NotAttempted,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Exhausted { .. } => "exhausted",
            Self::Fatal { .. } => "fatal",
            Self::NotAttempted => "not_attempted",
        }
    }
}

impl From<&RepairOutcome> for TargetStatus {
    fn from(outcome: &RepairOutcome) -> Self {
        match outcome {
            RepairOutcome::Success { attempt, committed } => Self::Success {
                attempt: *attempt,
                committed: *committed,
            },
            RepairOutcome::Exhausted { attempts, .. } => Self::Exhausted {
                attempts: *attempts,
            },
            RepairOutcome::Fatal(err) => Self::Fatal {
                scope: err.scope,
                reason: err.reason.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub model: String,
    pub target: String,
    #[serde(flatten)]
    pub status: TargetStatus,
}

impl TargetReport {
    pub fn new(model: &str, target: &str, status: TargetStatus) -> Self {
        Self {
            model: model.to_string(),
            target: target.to_string(),
            status,
        }
    }

    pub fn not_attempted(model: &str, target: &str) -> Self {
        Self::new(model, target, TargetStatus::NotAttempted)
    }
}

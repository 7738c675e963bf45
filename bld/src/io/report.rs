//! Run report: one line per (model, target) pair, optionally persisted as JSON.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{TargetReport, TargetStatus};
use crate::exit_codes;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// RFC 3339 timestamps.
    pub started_at: String,
    pub finished_at: String,
    /// Reason the run stopped early, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    /// Results in configuration order (models, then targets).
    pub targets: Vec<TargetReport>,
}

impl RunReport {
    pub fn count(&self, status: &str) -> usize {
        self.targets
            .iter()
            .filter(|t| t.status.as_str() == status)
            .count()
    }

    pub fn has_target_fatal(&self) -> bool {
        self.targets
            .iter()
            .any(|t| matches!(t.status, TargetStatus::Fatal { .. }))
    }

    /// Process exit code for this report.
    pub fn exit_code(&self) -> i32 {
        if self.aborted.is_some() {
            return exit_codes::INVALID;
        }
        if self.has_target_fatal() {
            return exit_codes::TARGET_FATAL;
        }
        exit_codes::OK
    }

    /// Human summary, one `model target status` line per pair.
    pub fn render_summary(&self) -> String {
        let mut buf = String::new();
        for entry in &self.targets {
            buf.push_str(&format!(
                "{} {} {}",
                entry.model,
                entry.target,
                entry.status.as_str()
            ));
            match &entry.status {
                TargetStatus::Success { attempt, committed } => {
                    buf.push_str(&format!(" attempt={attempt} committed={committed}"));
                }
                TargetStatus::Exhausted { attempts } => {
                    buf.push_str(&format!(" attempts={attempts}"));
                }
                TargetStatus::Fatal { reason, .. } => {
                    buf.push_str(&format!(" reason={}", first_line(reason)));
                }
                TargetStatus::NotAttempted => {}
            }
            buf.push('\n');
        }
        buf.push_str(&format!(
            "summary: success={} exhausted={} fatal={} not_attempted={}\n",
            self.count("success"),
            self.count("exhausted"),
            self.count("fatal"),
            self.count("not_attempted"),
        ));
        if let Some(reason) = &self.aborted {
            buf.push_str(&format!("aborted: {}\n", first_line(reason)));
        }
        buf
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// Write the report as pretty JSON (temp file + rename).
pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut payload = serde_json::to_string_pretty(report).context("serialize report")?;
    payload.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, payload).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

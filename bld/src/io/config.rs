//! Runner configuration stored in `bld.toml`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::naming::branch_collisions;
use crate::io::agent::DEFAULT_AGENT_TIMEOUT;
use crate::io::bazel::{DEFAULT_BUILD_TIMEOUT, DEFAULT_QUERY_TIMEOUT};
use crate::io::git::{DEFAULT_GIT_TIMEOUT, DEFAULT_OUTPUT_LIMIT_BYTES};

pub const DEFAULT_CONFIG_FILE: &str = "bld.toml";

/// Runner configuration (TOML).
///
/// Missing fields default to the model and target lists the tool was built
/// around: the OpenRouter top programming models and the ripgrep workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BldConfig {
    /// Prepended to every model before it is passed to the agent and named.
    pub model_prefix: String,

    /// Models to run, in order.
    pub models: Vec<String>,

    /// Bazel targets to repair for every model, in order.
    pub targets: Vec<String>,

    /// Base directory for session worktrees. Defaults to `<home>/worktree`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_dir: Option<PathBuf>,

    /// Create a placeholder `BUILD.bazel` for a target's package if missing.
    pub scaffold_build_files: bool,

    /// Number of models whose sessions run concurrently.
    pub parallel_models: usize,

    /// Truncate captured process output beyond this many bytes.
    pub output_limit_bytes: usize,

    pub timeouts: TimeoutConfig,

    pub agent: AgentConfig,
}

/// Per-invocation timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub agent_secs: u64,
    pub query_secs: u64,
    pub build_secs: u64,
    pub vcs_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable.
    pub command: String,
    /// Value passed to `--edit-format`.
    pub edit_format: String,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            agent_secs: DEFAULT_AGENT_TIMEOUT.as_secs(),
            query_secs: DEFAULT_QUERY_TIMEOUT.as_secs(),
            build_secs: DEFAULT_BUILD_TIMEOUT.as_secs(),
            vcs_secs: DEFAULT_GIT_TIMEOUT.as_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn agent(&self) -> Duration {
        Duration::from_secs(self.agent_secs)
    }

    pub fn query(&self) -> Duration {
        Duration::from_secs(self.query_secs)
    }

    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }

    pub fn vcs(&self) -> Duration {
        Duration::from_secs(self.vcs_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "aider".to_string(),
            edit_format: "diff".to_string(),
        }
    }
}

impl Default for BldConfig {
    fn default() -> Self {
        Self {
            model_prefix: "openrouter/".to_string(),
            models: default_models(),
            targets: default_targets(),
            worktree_dir: None,
            scaffold_build_files: true,
            parallel_models: 1,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            timeouts: TimeoutConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

/// OpenRouter's top programming models as of 2025-09-08.
pub fn default_models() -> Vec<String> {
    [
        "anthropic/claude-sonnet-4",
        "google/gemini-2.5-flash",
        "openai/gpt-4.1-mini",
        "google/gemini-2.5-pro",
        "openai/gpt-5",
        "qwen/qwen3-coder",
        "openrouter/sonoma-sky-alpha",
        "deepseek/deepseek-chat-v3.1",
        "x-ai/grok-code-fast-1",
        "x-ai/grok-4",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// ripgrep's crates, leaves first.
pub fn default_targets() -> Vec<String> {
    [
        "//crates/matcher:grep_matcher",
        "//crates/matcher:integration_test",
        "//crates/globset:globset",
        "//crates/cli:grep_cli",
        "//crates/regex:grep_regex",
        "//crates/searcher:grep_searcher",
        "//crates/pcre2:grep_pcre2",
        "//crates/ignore:ignore",
        "//crates/printer:grep_printer",
        "//crates/grep:grep",
        "//:ripgrep",
        "//:integration_test",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

impl BldConfig {
    /// Effective model identifiers (`model_prefix` applied), in configured order.
    pub fn model_ids(&self) -> Vec<String> {
        self.models
            .iter()
            .map(|model| format!("{}{}", self.model_prefix, model))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        validate_list("models", &self.models)?;
        validate_list("targets", &self.targets)?;
        let collisions = branch_collisions(&self.model_ids());
        if let Some(group) = collisions.first() {
            return Err(anyhow!(
                "models map to the same branch name: {}",
                group.join(", ")
            ));
        }
        if self.parallel_models == 0 {
            return Err(anyhow!("parallel_models must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        for (name, secs) in [
            ("timeouts.agent_secs", self.timeouts.agent_secs),
            ("timeouts.query_secs", self.timeouts.query_secs),
            ("timeouts.build_secs", self.timeouts.build_secs),
            ("timeouts.vcs_secs", self.timeouts.vcs_secs),
        ] {
            if secs == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
        }
        if self.agent.command.trim().is_empty() {
            return Err(anyhow!("agent.command must be non-empty"));
        }
        if let Some(dir) = &self.worktree_dir
            && !dir.is_absolute()
        {
            return Err(anyhow!(
                "worktree_dir must be an absolute path (got {})",
                dir.display()
            ));
        }
        Ok(())
    }
}

fn validate_list(name: &str, items: &[String]) -> Result<()> {
    if items.is_empty() {
        return Err(anyhow!("{name} must be a non-empty array"));
    }
    let mut seen = BTreeSet::new();
    for item in items {
        if item.trim().is_empty() {
            return Err(anyhow!("{name} must not contain blank entries"));
        }
        if !seen.insert(item.as_str()) {
            return Err(anyhow!("duplicate entry in {name}: '{item}'"));
        }
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BldConfig::default()`.
pub fn load_config(path: &Path) -> Result<BldConfig> {
    if !path.exists() {
        let cfg = BldConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BldConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &BldConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

//! Command implementations behind the `bld` binary.
//!
//! Each command returns the process exit code; errors that prevent a command
//! from producing a result propagate as `Err` and map to
//! [`exit_codes::INVALID`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::bootstrap::bootstrap_module;
use crate::exit_codes;
use crate::io::agent::AiderAgent;
use crate::io::bazel::Bazel;
use crate::io::config::{BldConfig, DEFAULT_CONFIG_FILE, load_config};
use crate::io::git::{Git, GitCli};
use crate::io::report::write_report;
use crate::orchestrator::Orchestrator;
use crate::repair::{RepairLoop, RepairPolicy};
use crate::session::SessionManager;

/// Directory under `$HOME` holding session worktrees.
pub const WORKTREE_DIR_NAME: &str = "worktree";

/// `--wd` if given, else the process working directory.
pub fn resolve_workdir(wd: Option<&Path>) -> Result<PathBuf> {
    match wd {
        Some(dir) => Ok(dir.to_path_buf()),
        None => std::env::current_dir().context("determine working directory"),
    }
}

/// `--config` if given, else `bld.toml` in the working directory.
pub fn resolve_config_path(workdir: &Path, config: Option<&Path>) -> PathBuf {
    config.map_or_else(|| workdir.join(DEFAULT_CONFIG_FILE), Path::to_path_buf)
}

/// Base directory for session worktrees: the configured override or `<home>/worktree`.
pub fn worktree_base(cfg: &BldConfig) -> Result<PathBuf> {
    if let Some(dir) = &cfg.worktree_dir {
        return Ok(dir.clone());
    }
    let home = dirs::home_dir().context("determine home directory")?;
    Ok(home.join(WORKTREE_DIR_NAME))
}

fn load(workdir: &Path, config: Option<&Path>) -> Result<BldConfig> {
    let path = resolve_config_path(workdir, config);
    info!(path = %path.display(), "loading config");
    load_config(&path)
}

/// `bld run`: repair every target for every model.
pub fn cmd_run(wd: Option<&Path>, config: Option<&Path>, report_path: Option<&Path>) -> Result<i32> {
    let workdir = resolve_workdir(wd)?;
    let cfg = load(&workdir, config)?;
    let base = worktree_base(&cfg)?;
    info!(workdir = %workdir.display(), worktree_dir = %base.display(), "starting bld run");

    let git = GitCli::new(cfg.timeouts.vcs(), cfg.output_limit_bytes);
    let sessions = SessionManager::discover(&git, &workdir, base)?;
    let bazel = Bazel::new(
        cfg.timeouts.query(),
        cfg.timeouts.build(),
        cfg.output_limit_bytes,
    );
    let agent = AiderAgent::new(&cfg.agent, cfg.output_limit_bytes);
    let repair = RepairLoop::new(&git, &bazel, &agent, RepairPolicy::from_config(&cfg));
    let orchestrator = Orchestrator::new(&sessions, &repair, cfg.model_ids(), cfg.targets.clone())
        .with_parallel_models(cfg.parallel_models);

    let report = orchestrator.run();
    print!("{}", report.render_summary());
    if let Some(path) = report_path {
        write_report(path, &report)?;
        info!(path = %path.display(), "wrote run report");
    }
    Ok(report.exit_code())
}

/// `bld sessions`: print the branch and worktree each model would use.
pub fn cmd_sessions(wd: Option<&Path>, config: Option<&Path>) -> Result<i32> {
    let workdir = resolve_workdir(wd)?;
    let cfg = load(&workdir, config)?;
    let git = GitCli::new(cfg.timeouts.vcs(), cfg.output_limit_bytes);
    let sessions = SessionManager::discover(&git, &workdir, worktree_base(&cfg)?)?;
    for model in cfg.model_ids() {
        let session = sessions.session_for(&model);
        println!(
            "{}\t{}\t{}",
            session.model,
            session.branch,
            session.worktree.display()
        );
    }
    Ok(exit_codes::OK)
}

/// `bld bootstrap`: create and resolve `MODULE.bazel` in the working directory.
pub fn cmd_bootstrap(wd: Option<&Path>) -> Result<i32> {
    let workdir = resolve_workdir(wd)?;
    let cfg = load(&workdir, None)?;
    let bazel = Bazel::new(
        cfg.timeouts.query(),
        cfg.timeouts.build(),
        cfg.output_limit_bytes,
    );
    let git = Git::new(&workdir).with_limits(cfg.timeouts.vcs(), cfg.output_limit_bytes);
    let outcome = bootstrap_module(&workdir, &bazel, &git)?;
    if outcome.created {
        println!("created MODULE.bazel");
    }
    if let Some(count) = outcome.target_count {
        println!("targets: {count}");
    }
    Ok(exit_codes::OK)
}

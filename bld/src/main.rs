//! Per-model Bazel target repair runner.
//!
//! `bld run` gives every configured model its own branch and worktree, then
//! asks a repair agent to make each configured target build, validating with
//! Bazel and committing what works.

use std::path::PathBuf;

use anyhow::Result;
use bld::{cli, exit_codes, logging};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bld", version, about = "Per-model Bazel target repair runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Repair every configured target for every configured model.
    Run {
        /// Detailed log file (appended to).
        #[arg(long, default_value = logging::DEFAULT_LOG_FILE)]
        log: PathBuf,
        /// Config file. Defaults to `bld.toml` in the working directory.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Repository to run in. Defaults to the current directory.
        #[arg(long)]
        wd: Option<PathBuf>,
        /// Write the run report as JSON to this path.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Print each model's branch and worktree path.
    Sessions {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        wd: Option<PathBuf>,
    },
    /// Create and resolve MODULE.bazel, committing it if it was missing.
    Bootstrap {
        #[arg(long)]
        wd: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    let log_path = match &cli.command {
        Command::Run { log, .. } => Some(log.clone()),
        Command::Sessions { .. } | Command::Bootstrap { .. } => None,
    };
    logging::init(log_path.as_deref());

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run {
            config, wd, report, ..
        } => cli::cmd_run(wd.as_deref(), config.as_deref(), report.as_deref()),
        Command::Sessions { config, wd } => cli::cmd_sessions(wd.as_deref(), config.as_deref()),
        Command::Bootstrap { wd } => cli::cmd_bootstrap(wd.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults_log_file() {
        let cli = Cli::try_parse_from(["bld", "run"]).expect("parse");
        let Command::Run {
            log, config, wd, report,
        } = cli.command
        else {
            panic!("expected run command");
        };
        assert_eq!(log, PathBuf::from("bld.log"));
        assert!(config.is_none() && wd.is_none() && report.is_none());
    }

    #[test]
    fn run_accepts_all_flags() {
        let cli = Cli::try_parse_from([
            "bld",
            "run",
            "--log",
            "/tmp/run.log",
            "--config",
            "/etc/bld.toml",
            "--wd",
            "/src/ripgrep",
            "--report",
            "out/report.json",
        ])
        .expect("parse");
        let Command::Run { wd, report, .. } = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(wd, Some(PathBuf::from("/src/ripgrep")));
        assert_eq!(report, Some(PathBuf::from("out/report.json")));
    }

    #[test]
    fn bootstrap_rejects_unknown_flags() {
        assert!(Cli::try_parse_from(["bld", "bootstrap", "--force"]).is_err());
    }
}

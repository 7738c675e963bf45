//! Per-model build-target repair runner.
//!
//! For every configured model, `bld` creates (or reuses) a dedicated git branch
//! and worktree, then walks the configured Bazel targets in order. Each target
//! gets a bounded number of repair attempts: an external agent edits the
//! worktree, Bazel validates the result, and the worktree is either committed
//! or stashed before the next attempt. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure logic (naming, label parsing, outcome types). No I/O.
//! - **[`io`]**: Side-effecting adapters (git, bazel, agent process, config,
//!   reports). Each external system sits behind a trait so the loop can be
//!   driven by scripted fakes in tests.
//!
//! Orchestration modules ([`session`], [`repair`], [`orchestrator`],
//! [`bootstrap`]) coordinate core logic with I/O to implement CLI commands.

pub mod bootstrap;
pub mod cli;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod repair;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

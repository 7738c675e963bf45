//! I/O adapters for `bld` commands.

pub mod agent;
pub mod bazel;
pub mod config;
pub mod descriptor;
pub mod git;
pub mod process;
pub mod prompt;
pub mod report;

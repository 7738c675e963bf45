//! Stable exit codes for `bld` commands.

/// Command succeeded; every attempted target was repaired or exhausted.
pub const OK: i32 = 0;
/// Invalid setup (config, working directory, branch) or the run was aborted.
pub const INVALID: i32 = 1;
/// The run completed but at least one target ended with a target-scoped fatal error.
pub const TARGET_FATAL: i32 = 2;

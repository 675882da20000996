//! Stable exit codes for modeler CLI commands.

/// Command succeeded; for `solve`/`resume`, the run was saved.
pub const OK: i32 = 0;
/// Invalid workspace, config, or run, or a runner error.
pub const ERROR: i32 = 1;
/// The run exhausted its retry budget and was aborted.
pub const ABORTED: i32 = 2;
/// The run hit `max_steps` while still running.
pub const STEP_LIMIT: i32 = 3;

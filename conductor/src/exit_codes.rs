//! Stable exit codes for conductor CLI commands.

/// The run (or validation) completed successfully.
pub const OK: i32 = 0;
/// The workflow could not be loaded or failed validation.
pub const INVALID: i32 = 1;
/// The run started but a step failed.
pub const RUN_FAILED: i32 = 2;
/// A DECIDE chain exhausted its loop budget.
pub const LOOP_LIMIT: i32 = 3;

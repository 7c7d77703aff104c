//! Exit code constants for the foreman CLI.
//!
//! The CLI surface is deliberately thin: 0 on success, 1 on any error
//! surfaced to the user. Error detail goes to stderr, not the exit code.

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// Any error surfaced to the user.
pub const FAILURE: i32 = 1;

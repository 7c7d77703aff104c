//! Error types for the foreman coordinator.
//!
//! Uses thiserror for derive macros and provides user-actionable error messages.
//! Every fallible operation in the crate returns [`Result`].

use thiserror::Error;

/// Main error type for foreman operations.
///
/// The first group of variants forms the coordination error taxonomy; the
/// trailing variants are infrastructure carriers (git subprocess failures,
/// bad user input) shared by the rest of the codebase.
#[derive(Error, Debug)]
pub enum ForemanError {
    /// An agent with this name is already connected.
    #[error("agent '{0}' is already registered and connected")]
    DuplicateAgent(String),

    /// The referenced agent is not registered.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// The submitted task's dependency list is malformed or forms a cycle.
    #[error("invalid dependency graph: {0}")]
    InvalidDependencyGraph(String),

    /// The referenced task does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Lost the race to claim a task. Absorbed inside the scoring pass,
    /// never surfaced to callers.
    #[error("claim conflict: {0}")]
    ClaimConflict(String),

    /// An agent missed its deadline or heartbeat window.
    #[error("agent timeout: {0}")]
    AgentTimeout(String),

    /// Integration produced overlapping changes against the baseline.
    #[error("merge conflict on task {task}: {}", paths.join(", "))]
    MergeConflict { task: String, paths: Vec<String> },

    /// The workspace or merge backend is unavailable.
    #[error("infrastructure failure: {0}")]
    InfrastructureFailure(String),

    /// Git operation failed.
    #[error("git operation failed: {0}")]
    GitError(String),

    /// User provided invalid arguments or the system is in an invalid state.
    #[error("{0}")]
    UserError(String),
}

impl ForemanError {
    /// Returns true for errors the scoring pass recovers from locally
    /// by moving on to the next candidate or the next pass.
    pub fn is_transient(&self) -> bool {
        matches!(self, ForemanError::ClaimConflict(_))
    }
}

/// Result type alias for foreman operations.
pub type Result<T> = std::result::Result<T, ForemanError>;

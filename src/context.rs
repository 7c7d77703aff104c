//! Repository and coordinator state-path resolution for foreman.
//!
//! Finds the Git repository root from any working directory (including from
//! inside an agent worktree) and resolves the coordinator state layout:
//! `.foreman/` for durable state (config, event log, message mirror) and
//! `.worktrees/` for per-task agent worktrees. Both live under the main
//! worktree so every process resolves the same paths.

use crate::error::{ForemanError, Result};
use crate::git;
use std::env;
use std::path::{Path, PathBuf};

/// Default state directory relative to repo root.
pub const DEFAULT_STATE_DIR: &str = ".foreman";

/// Default directory for per-task agent worktrees.
pub const DEFAULT_WORKTREES_DIR: &str = ".worktrees";

/// Resolved paths for the coordinator.
///
/// All paths are absolute.
#[derive(Debug, Clone)]
pub struct CoordContext {
    /// Absolute path to the main Git worktree (original clone location).
    pub repo_root: PathBuf,

    /// Absolute path to the coordinator state directory (`{repo_root}/.foreman/`).
    pub state_dir: PathBuf,

    /// Absolute path to the agent worktrees directory (`{repo_root}/.worktrees/`).
    pub worktrees_dir: PathBuf,
}

impl CoordContext {
    /// Resolve the context from the current working directory.
    pub fn resolve() -> Result<Self> {
        let cwd = env::current_dir().map_err(|e| {
            ForemanError::UserError(format!("failed to get current working directory: {}", e))
        })?;

        Self::resolve_from(&cwd)
    }

    /// Resolve the context from a specific directory.
    ///
    /// This is the entry point tests use so they never depend on the
    /// process working directory.
    pub fn resolve_from<P: AsRef<Path>>(cwd: P) -> Result<Self> {
        let cwd = cwd.as_ref();
        let repo_root = Self::find_main_worktree(cwd)?;

        let state_dir = repo_root.join(DEFAULT_STATE_DIR);
        let worktrees_dir = repo_root.join(DEFAULT_WORKTREES_DIR);

        Ok(Self {
            repo_root,
            state_dir,
            worktrees_dir,
        })
    }

    /// Find the main worktree from any directory within the repository.
    ///
    /// Handles invocation from the main worktree or from a linked agent
    /// worktree under `.worktrees/`.
    fn find_main_worktree<P: AsRef<Path>>(cwd: P) -> Result<PathBuf> {
        let cwd = cwd.as_ref();
        let current_toplevel = git::get_repo_root(cwd)?;

        match git::get_main_worktree(cwd) {
            Ok(main_worktree) if main_worktree.exists() => Ok(main_worktree),
            _ => Ok(current_toplevel),
        }
    }

    /// Create the state and worktree directories if they are missing.
    pub fn ensure_state_dirs(&self) -> Result<()> {
        for dir in [&self.state_dir, &self.worktrees_dir] {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    ForemanError::UserError(format!(
                        "failed to create directory '{}': {}",
                        dir.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Path to the coordinator config file.
    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join("config.yaml")
    }

    /// Path to the append-only NDJSON event log.
    pub fn events_file(&self) -> PathBuf {
        self.state_dir.join("events.ndjson")
    }

    /// Path to the human-readable message mirror.
    pub fn mirror_file(&self) -> PathBuf {
        self.state_dir.join("messages.md")
    }

    /// Path to a task's agent worktree.
    pub fn worktree_path(&self, dir_name: &str) -> PathBuf {
        self.worktrees_dir.join(dir_name)
    }
}

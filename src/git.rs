//! Git command runner for foreman.
//!
//! Provides a safe wrapper around git commands with captured stdout/stderr
//! and structured error handling. The workspace manager and merge coordinator
//! route every git operation through this module.

use crate::error::{ForemanError, Result};
use std::path::Path;
use std::process::{Command, Output};

/// Result of a successful git command execution.
#[derive(Debug, Clone)]
pub struct GitOutput {
    /// Standard output from the command (trimmed).
    pub stdout: String,
    /// Standard error from the command (trimmed).
    pub stderr: String,
}

impl GitOutput {
    fn from_output(output: &Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    /// Returns true if stdout is empty.
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty()
    }

    /// Returns stdout lines as a vector.
    pub fn lines(&self) -> Vec<&str> {
        if self.stdout.is_empty() {
            Vec::new()
        } else {
            self.stdout.lines().collect()
        }
    }
}

/// Run a git command with the specified working directory.
///
/// # Returns
///
/// * `Ok(GitOutput)` - On successful execution (exit code 0)
/// * `Err(ForemanError::GitError)` - On non-zero exit code
pub fn run_git<P: AsRef<Path>>(cwd: P, args: &[&str]) -> Result<GitOutput> {
    let cwd = cwd.as_ref();

    let output = Command::new("git")
        .current_dir(cwd)
        .args(args)
        .output()
        .map_err(|e| {
            ForemanError::GitError(format!(
                "failed to execute git {}: {}",
                args.first().unwrap_or(&""),
                e
            ))
        })?;

    let git_output = GitOutput::from_output(&output);

    if output.status.success() {
        Ok(git_output)
    } else {
        let exit_code = output.status.code().unwrap_or(-1);
        let error_msg = if git_output.stderr.is_empty() {
            git_output.stdout.clone()
        } else {
            git_output.stderr.clone()
        };

        Err(ForemanError::GitError(format!(
            "git {} failed (exit code {}): {}",
            args.first().unwrap_or(&""),
            exit_code,
            error_msg
        )))
    }
}

/// Get the repository root directory using `git rev-parse --show-toplevel`.
///
/// Works from any location within a git repository, including from within
/// linked worktrees. Not being in a repository is a clean user error, not
/// a git failure.
pub fn get_repo_root<P: AsRef<Path>>(cwd: P) -> Result<std::path::PathBuf> {
    let cwd = cwd.as_ref();

    let output = Command::new("git")
        .current_dir(cwd)
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .map_err(|e| {
            ForemanError::UserError(format!("failed to execute git: {} (is git installed?)", e))
        })?;

    let git_output = GitOutput::from_output(&output);

    if output.status.success() {
        Ok(std::path::PathBuf::from(&git_output.stdout))
    } else if git_output.stderr.contains("not a git repository") {
        Err(ForemanError::UserError(
            "not inside a git repository. Run this command from within a git repository."
                .to_string(),
        ))
    } else {
        Err(ForemanError::UserError(format!(
            "git command failed: {}",
            if git_output.stderr.is_empty() {
                &git_output.stdout
            } else {
                &git_output.stderr
            }
        )))
    }
}

/// Get the path to the main worktree (the original clone location).
///
/// When run from within a linked agent worktree, this returns the path to
/// the main worktree; `git worktree list --porcelain` lists it first.
pub fn get_main_worktree<P: AsRef<Path>>(cwd: P) -> Result<std::path::PathBuf> {
    let cwd = cwd.as_ref();
    let output = run_git(cwd, &["worktree", "list", "--porcelain"])?;

    for line in output.stdout.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            return Ok(std::path::PathBuf::from(path));
        }
    }

    get_repo_root(cwd)
}

/// Resolve a revision (branch name, SHA, `HEAD`) to its full commit SHA.
pub fn rev_parse<P: AsRef<Path>>(cwd: P, rev: &str) -> Result<String> {
    let output = run_git(cwd, &["rev-parse", "--verify", rev])?;
    Ok(output.stdout)
}

/// Check whether a local branch exists.
pub fn branch_exists<P: AsRef<Path>>(cwd: P, branch: &str) -> Result<bool> {
    let refname = format!("refs/heads/{}", branch);
    let output = Command::new("git")
        .current_dir(cwd.as_ref())
        .args(["show-ref", "--verify", "--quiet", &refname])
        .output()
        .map_err(|e| ForemanError::GitError(format!("failed to execute git show-ref: {}", e)))?;
    Ok(output.status.success())
}

/// Create a local branch at the given revision.
pub fn create_branch<P: AsRef<Path>>(cwd: P, branch: &str, at_rev: &str) -> Result<()> {
    run_git(cwd, &["branch", branch, at_rev])?;
    Ok(())
}

/// Delete a local branch, discarding unmerged commits.
pub fn delete_branch<P: AsRef<Path>>(cwd: P, branch: &str) -> Result<()> {
    run_git(cwd, &["branch", "-D", branch])?;
    Ok(())
}

/// Check if the working directory has uncommitted tracked changes.
pub fn has_uncommitted_changes<P: AsRef<Path>>(cwd: P) -> Result<bool> {
    let output = run_git(cwd, &["status", "--porcelain", "--untracked-files=no"])?;
    Ok(!output.is_empty())
}

/// List paths with unresolved merge conflicts in the working directory.
///
/// Returns an empty list when no merge is in progress or the merge applied
/// cleanly.
pub fn conflicted_paths<P: AsRef<Path>>(cwd: P) -> Result<Vec<String>> {
    let output = run_git(cwd, &["diff", "--name-only", "--diff-filter=U"])?;
    Ok(output.lines().iter().map(|s| s.to_string()).collect())
}

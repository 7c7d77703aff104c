//! Branch and worktree naming for agent workspaces.

use crate::store::TaskId;

/// Prefix for all coordinator-owned branches.
pub const BRANCH_PREFIX: &str = "foreman";

/// Maximum length of the description slug in branch and directory names.
const SLUG_MAX_LEN: usize = 24;

/// Slugify a task description for use in branch and directory names.
///
/// Lowercases, maps every non-alphanumeric run to a single hyphen, and
/// truncates. Returns an empty string when nothing survives.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(SLUG_MAX_LEN);
    let mut last_was_hyphen = true; // suppress a leading hyphen

    for ch in text.chars() {
        if slug.len() >= SLUG_MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() {
            slug.extend(ch.to_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }

    slug.trim_end_matches('-').to_string()
}

/// Branch name for a task's workspace, e.g. `foreman/task-001-login-flow`.
pub fn branch_name(task: TaskId, description: &str) -> String {
    let slug = slugify(description);
    if slug.is_empty() {
        format!("{}/task-{:03}", BRANCH_PREFIX, task.value())
    } else {
        format!("{}/task-{:03}-{}", BRANCH_PREFIX, task.value(), slug)
    }
}

/// Worktree directory name for a task, e.g. `task-001-login-flow`.
pub fn worktree_dir_name(task: TaskId, description: &str) -> String {
    let slug = slugify(description);
    if slug.is_empty() {
        format!("task-{:03}", task.value())
    } else {
        format!("task-{:03}-{}", task.value(), slug)
    }
}

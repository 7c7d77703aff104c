//! Merge coordination for foreman.
//!
//! Integrates finished workspace branches into the shared baseline, one at
//! a time. A single async mutex is the admission slot: whoever holds it owns
//! the baseline checkout in the main worktree, so two integrations can never
//! interleave their git state.
//!
//! A merge is never left half-done. Either it commits and the baseline
//! advances, or it is aborted and the baseline is byte-for-byte what it was
//! before the attempt.

use crate::context::CoordContext;
use crate::git;
use crate::store::TaskId;
use crate::workspace::WorkspaceSession;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Record of one integration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// The workspace session that was integrated.
    pub session: Uuid,
    pub task: TaskId,
    pub outcome: MergeOutcome,
}

/// Classification of one integration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merge applied cleanly; the baseline now points at `revision`.
    Clean { revision: String },
    /// Overlapping changes; `paths` lists the conflicted files. The merge
    /// was aborted and the baseline is unchanged.
    Conflict { paths: Vec<String> },
    /// The attempt failed for reasons other than content conflicts (dirty
    /// baseline, git errors). The baseline is unchanged.
    Aborted { reason: String },
}

/// Serializes integrations into the baseline branch.
#[derive(Debug)]
pub struct MergeCoordinator {
    ctx: CoordContext,
    baseline_branch: String,
    slot: Mutex<()>,
}

impl MergeCoordinator {
    pub fn new(ctx: CoordContext, baseline_branch: impl Into<String>) -> Self {
        Self {
            ctx,
            baseline_branch: baseline_branch.into(),
            slot: Mutex::new(()),
        }
    }

    /// Integrate a ready workspace branch into the baseline.
    ///
    /// Holds the admission slot for the whole attempt, so concurrent callers
    /// integrate strictly one after another. Content conflicts and
    /// infrastructure failures are outcomes, not errors.
    pub async fn integrate(&self, session: &WorkspaceSession) -> MergeResult {
        let _slot = self.slot.lock().await;
        MergeResult {
            session: session.id,
            task: session.task,
            outcome: self.integrate_locked(session),
        }
    }

    fn integrate_locked(&self, session: &WorkspaceSession) -> MergeOutcome {
        let root = &self.ctx.repo_root;

        match git::has_uncommitted_changes(root) {
            Ok(false) => {}
            Ok(true) => {
                return MergeOutcome::Aborted {
                    reason: "baseline worktree has uncommitted changes".to_string(),
                };
            }
            Err(e) => {
                return MergeOutcome::Aborted {
                    reason: format!("cannot inspect baseline worktree: {}", e),
                };
            }
        }

        if let Err(e) = git::run_git(root, &["checkout", &self.baseline_branch]) {
            return MergeOutcome::Aborted {
                reason: format!(
                    "cannot check out baseline branch '{}': {}",
                    self.baseline_branch, e
                ),
            };
        }

        // A branch already contained in the baseline has nothing to merge.
        // This is a revision check, not a parse of git's (localized) output.
        if git::run_git(root, &["merge-base", "--is-ancestor", &session.branch, "HEAD"]).is_ok() {
            return match git::rev_parse(root, "HEAD") {
                Ok(revision) => MergeOutcome::Clean { revision },
                Err(e) => MergeOutcome::Aborted {
                    reason: format!("cannot resolve baseline HEAD: {}", e),
                },
            };
        }

        match git::run_git(root, &["merge", "--no-ff", "--no-commit", &session.branch]) {
            Ok(_) => self.commit_merge(session),
            Err(merge_err) => {
                let paths = git::conflicted_paths(root).unwrap_or_default();
                if paths.is_empty() {
                    self.abort(format!("merge failed: {}", merge_err))
                } else {
                    self.abort_conflict(paths)
                }
            }
        }
    }

    fn commit_merge(&self, session: &WorkspaceSession) -> MergeOutcome {
        let root = &self.ctx.repo_root;
        let message = format!("Integrate {}", session.task);

        if let Err(e) = git::run_git(root, &["commit", "--no-verify", "-m", &message]) {
            return self.abort(format!("merge commit failed: {}", e));
        }

        match git::rev_parse(root, "HEAD") {
            Ok(revision) => MergeOutcome::Clean { revision },
            Err(e) => MergeOutcome::Aborted {
                reason: format!("merge committed but HEAD is unreadable: {}", e),
            },
        }
    }

    fn abort(&self, reason: String) -> MergeOutcome {
        self.abort_in_progress();
        MergeOutcome::Aborted { reason }
    }

    fn abort_conflict(&self, paths: Vec<String>) -> MergeOutcome {
        self.abort_in_progress();
        MergeOutcome::Conflict { paths }
    }

    /// Roll back an in-progress merge. A failure here is logged; there may
    /// be no merge to abort.
    fn abort_in_progress(&self) {
        if let Err(e) = git::run_git(&self.ctx.repo_root, &["merge", "--abort"]) {
            tracing::debug!(error = %e, "merge --abort skipped");
        }
    }
}

//! Workspace manager for foreman.
//!
//! Provisions one isolated git workspace per assigned task: a branch cut
//! from the baseline plus a linked worktree under `.worktrees/`. Agents
//! work and commit only inside their own worktree; nothing here ever
//! touches the baseline branch (that is the merge coordinator's job).
//!
//! Session lifecycle:
//!
//! ```text
//! provisioned -> active -> ready_to_merge -> merged
//!       |           |            |
//!       +-----------+------------+--> discarded
//! ```

mod naming;

pub use naming::{BRANCH_PREFIX, branch_name, slugify, worktree_dir_name};

use crate::context::CoordContext;
use crate::error::{ForemanError, Result};
use crate::git;
use crate::registry::AgentId;
use crate::store::TaskId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle state of a workspace session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Branch and worktree exist; no agent has started work.
    Provisioned,
    /// The assigned agent acknowledged and is working in the worktree.
    Active,
    /// Work is committed and queued for integration.
    ReadyToMerge,
    /// Integration landed; branch and worktree are gone.
    Merged,
    /// Session abandoned; branch and worktree are gone.
    Discarded,
}

impl SessionState {
    /// Whether the branch and worktree still exist on disk.
    pub fn is_live(self) -> bool {
        !matches!(self, SessionState::Merged | SessionState::Discarded)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Provisioned => "provisioned",
            SessionState::Active => "active",
            SessionState::ReadyToMerge => "ready_to_merge",
            SessionState::Merged => "merged",
            SessionState::Discarded => "discarded",
        };
        f.write_str(s)
    }
}

/// A provisioned workspace for one task assignment.
#[derive(Debug, Clone)]
pub struct WorkspaceSession {
    pub id: Uuid,
    pub task: TaskId,
    pub agent: AgentId,
    /// Baseline commit the branch was cut from.
    pub base_rev: String,
    pub branch: String,
    pub path: PathBuf,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}

/// Creates and tears down per-task branches and worktrees.
#[derive(Debug)]
pub struct WorkspaceManager {
    ctx: CoordContext,
    baseline_branch: String,
    sessions: Mutex<HashMap<TaskId, WorkspaceSession>>,
}

impl WorkspaceManager {
    pub fn new(ctx: CoordContext, baseline_branch: impl Into<String>) -> Self {
        Self {
            ctx,
            baseline_branch: baseline_branch.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Provision a workspace for a task: cut a branch from the baseline and
    /// add a linked worktree for it.
    ///
    /// At most one live session may exist per task. Git failures surface as
    /// [`ForemanError::InfrastructureFailure`]; the caller decides whether
    /// to requeue the task.
    pub fn provision(
        &self,
        task: TaskId,
        description: &str,
        agent: AgentId,
    ) -> Result<WorkspaceSession> {
        {
            let sessions = self.sessions.lock();
            if let Some(existing) = sessions.get(&task)
                && existing.state.is_live()
            {
                return Err(ForemanError::InfrastructureFailure(format!(
                    "workspace for {} already exists at '{}'",
                    task,
                    existing.path.display()
                )));
            }
        }

        let root = &self.ctx.repo_root;
        let base_rev = git::rev_parse(root, &self.baseline_branch).map_err(|e| {
            ForemanError::InfrastructureFailure(format!(
                "cannot resolve baseline branch '{}': {}",
                self.baseline_branch, e
            ))
        })?;

        let branch = branch_name(task, description);
        let dir_name = worktree_dir_name(task, description);
        let path = self.ctx.worktree_path(&dir_name);

        self.ctx.ensure_state_dirs()?;

        git::create_branch(root, &branch, &base_rev).map_err(|e| {
            ForemanError::InfrastructureFailure(format!(
                "failed to create branch '{}': {}",
                branch, e
            ))
        })?;

        let path_str = path.to_string_lossy();
        if let Err(e) = git::run_git(root, &["worktree", "add", &path_str, &branch]) {
            // The branch is orphaned without its worktree; drop it.
            if let Err(cleanup) = git::delete_branch(root, &branch) {
                tracing::warn!(branch = %branch, error = %cleanup, "branch cleanup failed");
            }
            return Err(ForemanError::InfrastructureFailure(format!(
                "failed to add worktree at '{}': {}",
                path.display(),
                e
            )));
        }

        let session = WorkspaceSession {
            id: Uuid::new_v4(),
            task,
            agent,
            base_rev,
            branch,
            path,
            state: SessionState::Provisioned,
            created_at: Utc::now(),
        };

        self.sessions.lock().insert(task, session.clone());
        Ok(session)
    }

    fn transition(
        &self,
        task: TaskId,
        from: SessionState,
        to: SessionState,
    ) -> Result<WorkspaceSession> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(&task).ok_or_else(|| {
            ForemanError::UserError(format!("no workspace session for {}", task))
        })?;
        if session.state != from {
            return Err(ForemanError::UserError(format!(
                "workspace for {} is {}, expected {}",
                task, session.state, from
            )));
        }
        session.state = to;
        Ok(session.clone())
    }

    /// Mark the session active (the agent acknowledged its assignment).
    pub fn activate(&self, task: TaskId) -> Result<WorkspaceSession> {
        self.transition(task, SessionState::Provisioned, SessionState::Active)
    }

    /// Mark the session ready for integration.
    pub fn mark_ready(&self, task: TaskId) -> Result<WorkspaceSession> {
        self.transition(task, SessionState::Active, SessionState::ReadyToMerge)
    }

    /// Tear down a merged session's branch and worktree.
    pub fn finalize_merged(&self, task: TaskId) -> Result<()> {
        let session = self.transition(task, SessionState::ReadyToMerge, SessionState::Merged)?;
        self.remove_artifacts(&session, true)
    }

    /// Abandon a session and clean up best-effort.
    ///
    /// Idempotent: discarding an unknown or already-dead session is a no-op.
    /// Cleanup failures are logged, not returned; a leftover worktree must
    /// not block the state machine.
    pub fn discard(&self, task: TaskId) {
        let session = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(&task) {
                Some(session) if session.state.is_live() => {
                    session.state = SessionState::Discarded;
                    session.clone()
                }
                _ => return,
            }
        };

        if let Err(e) = self.remove_artifacts(&session, false) {
            tracing::warn!(task = %task, error = %e, "workspace cleanup failed");
        }
    }

    fn remove_artifacts(&self, session: &WorkspaceSession, strict: bool) -> Result<()> {
        let root = &self.ctx.repo_root;
        let path_str = session.path.to_string_lossy();

        let removed = git::run_git(root, &["worktree", "remove", "--force", &path_str]);
        let deleted = git::delete_branch(root, &session.branch);

        if strict {
            removed.map(|_| ()).and(deleted)
        } else {
            if let Err(e) = removed {
                tracing::warn!(path = %session.path.display(), error = %e, "worktree removal failed");
            }
            if let Err(e) = deleted {
                tracing::warn!(branch = %session.branch, error = %e, "branch removal failed");
            }
            Ok(())
        }
    }

    /// Current session for a task, if any.
    pub fn session(&self, task: TaskId) -> Option<WorkspaceSession> {
        self.sessions.lock().get(&task).cloned()
    }

    /// Live sessions belonging to an agent.
    pub fn live_sessions_for_agent(&self, agent: AgentId) -> Vec<WorkspaceSession> {
        let sessions = self.sessions.lock();
        let mut live: Vec<WorkspaceSession> = sessions
            .values()
            .filter(|s| s.agent == agent && s.state.is_live())
            .cloned()
            .collect();
        live.sort_by_key(|s| s.task);
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::create_test_repo;

    fn manager(temp: &tempfile::TempDir) -> WorkspaceManager {
        let ctx = CoordContext::resolve_from(temp.path()).unwrap();
        WorkspaceManager::new(ctx, "main")
    }

    #[test]
    fn provision_creates_branch_and_worktree() {
        let temp = create_test_repo();
        let mgr = manager(&temp);

        let session = mgr
            .provision(TaskId::new(1), "implement login", AgentId::new())
            .unwrap();

        assert_eq!(session.state, SessionState::Provisioned);
        assert_eq!(session.branch, "foreman/task-001-implement-login");
        assert!(session.path.exists());
        assert!(git::branch_exists(temp.path(), &session.branch).unwrap());
        assert_eq!(session.base_rev.len(), 40);
    }

    #[test]
    fn provision_twice_for_same_task_fails() {
        let temp = create_test_repo();
        let mgr = manager(&temp);
        let task = TaskId::new(1);

        mgr.provision(task, "implement login", AgentId::new()).unwrap();
        let err = mgr.provision(task, "implement login", AgentId::new()).unwrap_err();
        assert!(matches!(err, ForemanError::InfrastructureFailure(_)));
    }

    #[test]
    fn provision_with_missing_baseline_is_infrastructure_failure() {
        let temp = create_test_repo();
        let ctx = CoordContext::resolve_from(temp.path()).unwrap();
        let mgr = WorkspaceManager::new(ctx, "no-such-branch");

        let err = mgr
            .provision(TaskId::new(1), "implement login", AgentId::new())
            .unwrap_err();
        assert!(matches!(err, ForemanError::InfrastructureFailure(_)));
    }

    #[test]
    fn session_walks_the_happy_path() {
        let temp = create_test_repo();
        let mgr = manager(&temp);
        let task = TaskId::new(1);

        mgr.provision(task, "implement login", AgentId::new()).unwrap();
        assert_eq!(mgr.activate(task).unwrap().state, SessionState::Active);
        assert_eq!(
            mgr.mark_ready(task).unwrap().state,
            SessionState::ReadyToMerge
        );
    }

    #[test]
    fn out_of_order_transition_is_rejected() {
        let temp = create_test_repo();
        let mgr = manager(&temp);
        let task = TaskId::new(1);

        mgr.provision(task, "implement login", AgentId::new()).unwrap();
        assert!(mgr.mark_ready(task).is_err());
    }

    #[test]
    fn finalize_merged_removes_artifacts() {
        let temp = create_test_repo();
        let mgr = manager(&temp);
        let task = TaskId::new(1);

        let session = mgr.provision(task, "implement login", AgentId::new()).unwrap();
        mgr.activate(task).unwrap();
        mgr.mark_ready(task).unwrap();
        mgr.finalize_merged(task).unwrap();

        assert!(!session.path.exists());
        assert!(!git::branch_exists(temp.path(), &session.branch).unwrap());
        assert_eq!(mgr.session(task).unwrap().state, SessionState::Merged);
    }

    #[test]
    fn discard_cleans_up_and_is_idempotent() {
        let temp = create_test_repo();
        let mgr = manager(&temp);
        let task = TaskId::new(1);

        let session = mgr.provision(task, "implement login", AgentId::new()).unwrap();
        mgr.discard(task);

        assert!(!session.path.exists());
        assert!(!git::branch_exists(temp.path(), &session.branch).unwrap());
        assert_eq!(mgr.session(task).unwrap().state, SessionState::Discarded);

        // Second discard is a no-op.
        mgr.discard(task);
        mgr.discard(TaskId::new(99));
    }

    #[test]
    fn reprovision_after_discard_is_allowed() {
        let temp = create_test_repo();
        let mgr = manager(&temp);
        let task = TaskId::new(1);

        mgr.provision(task, "implement login", AgentId::new()).unwrap();
        mgr.discard(task);
        assert!(mgr.provision(task, "implement login", AgentId::new()).is_ok());
    }

    #[test]
    fn live_sessions_for_agent_excludes_dead_sessions() {
        let temp = create_test_repo();
        let mgr = manager(&temp);
        let agent = AgentId::new();

        mgr.provision(TaskId::new(1), "implement one", agent).unwrap();
        mgr.provision(TaskId::new(2), "implement two", agent).unwrap();
        mgr.discard(TaskId::new(1));

        let live = mgr.live_sessions_for_agent(agent);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].task, TaskId::new(2));
    }
}

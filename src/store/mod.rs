//! Task store and state machine for foreman.
//!
//! Owns the canonical record of every task: identity, description, derived
//! profile, dependency edges, and lifecycle state. All transitions go
//! through methods on [`TaskStore`], which enforce the legal edges:
//!
//! ```text
//! pending -> assigned -> in_progress -> integrating -> done
//!    ^          |             |              |
//!    +----------+-------------+              v
//!    (requeue, retries <= limit)          failed
//! ```
//!
//! Claiming is test-and-set under the task's own lock, so two concurrent
//! claims for the same task cannot both succeed. Benign repeats of wire
//! messages (a duplicate completion report, a stale start ack) are no-ops
//! rather than errors, so replaying a message stream converges on the same
//! state.

use crate::analyzer::TaskProfile;
use crate::error::{ForemanError, Result};
use crate::registry::AgentId;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::LazyLock;

static TASK_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^TASK-(\d{3,})$").unwrap_or_else(|_| unreachable!()));

/// Sequential task identifier, rendered as `TASK-001`, `TASK-002`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u32);

impl TaskId {
    pub fn new(n: u32) -> Self {
        Self(n)
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TASK-{:03}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = ForemanError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = TASK_ID_RE
            .captures(s.trim())
            .ok_or_else(|| ForemanError::TaskNotFound(s.trim().to_string()))?;
        let n: u32 = caps[1]
            .parse()
            .map_err(|_| ForemanError::TaskNotFound(s.trim().to_string()))?;
        Ok(Self(n))
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Assigned,
    InProgress,
    Integrating,
    Done,
    Failed,
}

impl TaskState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }

    /// States in which an agent holds the task.
    pub fn is_active_assignment(self) -> bool {
        matches!(
            self,
            TaskState::Assigned | TaskState::InProgress | TaskState::Integrating
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Assigned => "assigned",
            TaskState::InProgress => "in_progress",
            TaskState::Integrating => "integrating",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of a requeue request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Task is pending again; the new retry count is included.
    Requeued(u32),
    /// Retry ceiling reached; task is now failed.
    RetriesExhausted,
}

/// Full record of a task.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub description: String,
    pub profile: TaskProfile,
    pub depends_on: Vec<TaskId>,
    pub state: TaskState,
    pub assigned_agent: Option<AgentId>,
    /// Times the task has been returned to pending.
    pub retries: u32,
    /// Populated on terminal failure.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when claimed, cleared on requeue. Drives the deadline sweep.
    pub assigned_at: Option<DateTime<Utc>>,
    /// Set on reaching a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

type TaskEntry = Arc<Mutex<TaskRecord>>;

/// In-memory task store.
///
/// The outer map lock only locates entries; transitions take the entry's
/// own mutex. No method locks two entries at once.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,
    next_id: AtomicU32,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending task.
    ///
    /// Every dependency must already exist, the task may not depend on its
    /// own ID, and the resulting graph must stay acyclic. On rejection no
    /// ID is consumed from the visible sequence (the record is simply never
    /// inserted).
    pub fn insert(
        &self,
        description: &str,
        profile: TaskProfile,
        depends_on: Vec<TaskId>,
    ) -> Result<TaskId> {
        let description = description.trim();
        if description.is_empty() {
            return Err(ForemanError::UserError(
                "task description must not be empty".to_string(),
            ));
        }

        let mut tasks = self.tasks.write();

        // The map's write lock is held, so peeking then bumping is race-free.
        let id = TaskId::new(self.next_id.load(Ordering::SeqCst) + 1);

        for dep in &depends_on {
            if *dep == id {
                return Err(ForemanError::InvalidDependencyGraph(format!(
                    "{} cannot depend on itself",
                    id
                )));
            }
            if !tasks.contains_key(dep) {
                return Err(ForemanError::TaskNotFound(dep.to_string()));
            }
        }

        Self::check_acyclic(&tasks, id, &depends_on)?;
        self.next_id.fetch_add(1, Ordering::SeqCst);

        let record = TaskRecord {
            id,
            description: description.to_string(),
            profile,
            depends_on,
            state: TaskState::Pending,
            assigned_agent: None,
            retries: 0,
            error: None,
            created_at: Utc::now(),
            assigned_at: None,
            completed_at: None,
        };

        tasks.insert(id, Arc::new(Mutex::new(record)));
        Ok(id)
    }

    /// Depth-first walk from the new task's dependencies; revisiting the new
    /// task means the edge set closed a cycle.
    fn check_acyclic(
        tasks: &HashMap<TaskId, TaskEntry>,
        new_id: TaskId,
        depends_on: &[TaskId],
    ) -> Result<()> {
        let mut visited: HashSet<TaskId> = HashSet::new();
        let mut stack: Vec<TaskId> = depends_on.to_vec();

        while let Some(current) = stack.pop() {
            if current == new_id {
                return Err(ForemanError::InvalidDependencyGraph(format!(
                    "adding {} would create a dependency cycle",
                    new_id
                )));
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(entry) = tasks.get(&current) {
                stack.extend(entry.lock().depends_on.iter().copied());
            }
        }
        Ok(())
    }

    fn entry(&self, id: TaskId) -> Result<TaskEntry> {
        self.tasks
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| ForemanError::TaskNotFound(id.to_string()))
    }

    /// Claim a pending task for an agent (pending -> assigned).
    ///
    /// Test-and-set: exactly one concurrent claim succeeds; the rest get
    /// [`ForemanError::ClaimConflict`].
    pub fn claim(&self, id: TaskId, agent: AgentId) -> Result<()> {
        let entry = self.entry(id)?;
        let mut task = entry.lock();
        if task.state != TaskState::Pending {
            return Err(ForemanError::ClaimConflict(id.to_string()));
        }
        task.state = TaskState::Assigned;
        task.assigned_agent = Some(agent);
        task.assigned_at = Some(Utc::now());
        Ok(())
    }

    /// Acknowledge the assignment (assigned -> in_progress).
    ///
    /// Returns `Ok(false)` when the task already progressed past assigned,
    /// so a duplicate ack is harmless.
    pub fn ack_started(&self, id: TaskId, agent: AgentId) -> Result<bool> {
        let entry = self.entry(id)?;
        let mut task = entry.lock();
        if task.assigned_agent != Some(agent) {
            return Ok(false);
        }
        if task.state != TaskState::Assigned {
            return Ok(false);
        }
        task.state = TaskState::InProgress;
        Ok(true)
    }

    /// Move an in-progress task into integration (in_progress -> integrating).
    ///
    /// Returns `Ok(false)` when the task is not in progress under this
    /// agent, which absorbs duplicate completion reports.
    pub fn try_begin_integration(&self, id: TaskId, agent: AgentId) -> Result<bool> {
        let entry = self.entry(id)?;
        let mut task = entry.lock();
        if task.assigned_agent != Some(agent) || task.state != TaskState::InProgress {
            return Ok(false);
        }
        task.state = TaskState::Integrating;
        Ok(true)
    }

    /// Finish integration successfully (integrating -> done).
    pub fn complete(&self, id: TaskId) -> Result<bool> {
        let entry = self.entry(id)?;
        let mut task = entry.lock();
        if task.state != TaskState::Integrating {
            return Ok(false);
        }
        task.state = TaskState::Done;
        task.completed_at = Some(Utc::now());
        Ok(true)
    }

    /// Move a task to terminal failure with an error message.
    ///
    /// A task that already reached a terminal state is left untouched.
    pub fn fail(&self, id: TaskId, error: &str) -> Result<bool> {
        let entry = self.entry(id)?;
        let mut task = entry.lock();
        if task.state.is_terminal() {
            return Ok(false);
        }
        task.state = TaskState::Failed;
        task.error = Some(error.to_string());
        task.completed_at = Some(Utc::now());
        Ok(true)
    }

    /// Return an actively assigned task to pending, incrementing retries.
    ///
    /// If the new retry count exceeds `retry_limit` the task fails
    /// terminally instead.
    pub fn requeue(&self, id: TaskId, reason: &str, retry_limit: u32) -> Result<RequeueOutcome> {
        let entry = self.entry(id)?;
        let mut task = entry.lock();
        if !task.state.is_active_assignment() {
            return Err(ForemanError::UserError(format!(
                "cannot requeue {}: task is {}",
                id, task.state
            )));
        }

        task.retries += 1;
        if task.retries > retry_limit {
            task.state = TaskState::Failed;
            task.error = Some(format!("retry limit exceeded: {}", reason));
            task.completed_at = Some(Utc::now());
            return Ok(RequeueOutcome::RetriesExhausted);
        }

        task.state = TaskState::Pending;
        task.assigned_agent = None;
        task.assigned_at = None;
        Ok(RequeueOutcome::Requeued(task.retries))
    }

    /// Whether every dependency of the task is done.
    pub fn deps_satisfied(&self, id: TaskId) -> Result<bool> {
        let deps = {
            let entry = self.entry(id)?;
            let task = entry.lock();
            task.depends_on.clone()
        };

        for dep in deps {
            let entry = self.entry(dep)?;
            let done = entry.lock().state == TaskState::Done;
            if !done {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Pending tasks whose dependencies are all done, in ID order.
    pub fn eligible(&self) -> Vec<TaskRecord> {
        let pending = self.filtered(|task| task.state == TaskState::Pending);
        pending
            .into_iter()
            .filter(|task| self.deps_satisfied(task.id).unwrap_or(false))
            .collect()
    }

    /// Tasks assigned to the given agent in a non-terminal state.
    pub fn active_for_agent(&self, agent: AgentId) -> Vec<TaskRecord> {
        self.filtered(|task| {
            task.assigned_agent == Some(agent) && task.state.is_active_assignment()
        })
    }

    /// Assigned or in-progress tasks whose deadline has passed.
    ///
    /// A task already integrating is left alone; the merge decides its fate.
    pub fn overdue(&self, now: DateTime<Utc>, deadline: chrono::Duration) -> Vec<TaskRecord> {
        self.filtered(|task| {
            matches!(task.state, TaskState::Assigned | TaskState::InProgress)
                && task
                    .assigned_at
                    .is_some_and(|assigned| now - assigned > deadline)
        })
    }

    fn filtered<F: Fn(&TaskRecord) -> bool>(&self, pred: F) -> Vec<TaskRecord> {
        let tasks = self.tasks.read();
        let mut matched: Vec<TaskRecord> = tasks
            .values()
            .filter_map(|entry| {
                let task = entry.lock();
                pred(&task).then(|| task.clone())
            })
            .collect();
        matched.sort_by_key(|task| task.id);
        matched
    }

    /// Clone of a single task record.
    pub fn get(&self, id: TaskId) -> Result<TaskRecord> {
        let entry = self.entry(id)?;
        let task = entry.lock();
        Ok(task.clone())
    }

    /// Clones of all task records, in ID order.
    pub fn snapshot_all(&self) -> Vec<TaskRecord> {
        self.filtered(|_| true)
    }

    /// Count of tasks per state, for status output.
    pub fn counts(&self) -> HashMap<TaskState, usize> {
        let tasks = self.tasks.read();
        let mut counts = HashMap::new();
        for entry in tasks.values() {
            *counts.entry(entry.lock().state).or_insert(0) += 1;
        }
        counts
    }
}

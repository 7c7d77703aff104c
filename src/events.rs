//! Event logging subsystem for foreman.
//!
//! Implements append-only event logging to support audit and recovery.
//! Every state transition the coordinator performs is recorded in NDJSON
//! format (one JSON object per line) in `.foreman/events.ndjson`.
//!
//! The log is the durable record: the `status` command rebuilds its view of
//! terminal task states by replaying it, so an event must be appended in the
//! same step as the transition it records.
//!
//! # Event Format
//!
//! - `ts`: RFC3339 timestamp
//! - `action`: the transition performed (task_submitted, merge_clean, ...)
//! - `actor`: the coordinator identity (`user@HOST`)
//! - `task`: optional task ID for task-scoped events
//! - `details`: freeform object with action-specific details

use crate::error::{ForemanError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Actions that can be logged as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Task accepted into the store (pending).
    TaskSubmitted,
    /// Task claimed for an agent (pending -> assigned).
    TaskAssigned,
    /// Agent acknowledged the assignment (assigned -> in_progress).
    TaskStarted,
    /// Completion report received (in_progress -> integrating).
    TaskIntegrating,
    /// Clean merge landed (integrating -> done).
    TaskDone,
    /// Task reached a terminal failure.
    TaskFailed,
    /// Task returned to pending with an incremented retry counter.
    TaskRequeued,
    /// Agent registered.
    AgentRegistered,
    /// Agent deregistered.
    AgentDeregistered,
    /// Agent missed its heartbeat window.
    AgentTimedOut,
    /// Workspace branch and worktree created.
    WorkspaceProvisioned,
    /// Workspace removed before integration.
    WorkspaceDiscarded,
    /// Integration applied cleanly and the baseline advanced.
    MergeClean,
    /// Integration hit overlapping changes.
    MergeConflict,
    /// Integration failed for infrastructure reasons.
    MergeAborted,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventAction::TaskSubmitted => "task_submitted",
            EventAction::TaskAssigned => "task_assigned",
            EventAction::TaskStarted => "task_started",
            EventAction::TaskIntegrating => "task_integrating",
            EventAction::TaskDone => "task_done",
            EventAction::TaskFailed => "task_failed",
            EventAction::TaskRequeued => "task_requeued",
            EventAction::AgentRegistered => "agent_registered",
            EventAction::AgentDeregistered => "agent_deregistered",
            EventAction::AgentTimedOut => "agent_timed_out",
            EventAction::WorkspaceProvisioned => "workspace_provisioned",
            EventAction::WorkspaceDiscarded => "workspace_discarded",
            EventAction::MergeClean => "merge_clean",
            EventAction::MergeConflict => "merge_conflict",
            EventAction::MergeAborted => "merge_aborted",
        };
        f.write_str(s)
    }
}

/// An event record for the audit log.
///
/// Events are serialized as single-line JSON objects and appended to
/// the events.ndjson file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// RFC3339 timestamp when the event occurred.
    pub ts: DateTime<Utc>,

    /// The action that was performed.
    pub action: EventAction,

    /// The coordinator identity that performed the action (e.g. `user@HOST`).
    pub actor: String,

    /// Optional task ID for task-scoped events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    /// Freeform details object with action-specific information.
    pub details: Value,
}

impl Event {
    /// Create a new event with the given action.
    ///
    /// The timestamp is set to the current time, and the actor is
    /// determined from the environment (USER@HOSTNAME).
    pub fn new(action: EventAction) -> Self {
        Self {
            ts: Utc::now(),
            action,
            actor: actor_string(),
            task: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the task ID for this event.
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task = Some(task_id.into());
        self
    }

    /// Set the details object for this event.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            ForemanError::UserError(format!("failed to serialize event to JSON: {}", e))
        })
    }
}

/// Get the actor string for event metadata.
pub fn actor_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}

/// Append-only NDJSON event log.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// Create an event log handle for the given file path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append an event as a single JSON line, creating the file (and its
    /// parent directory) if needed. The write is synced to disk so the log
    /// and the state it records move together.
    pub fn append(&self, event: &Event) -> Result<()> {
        let json_line = event.to_ndjson_line()?;

        if let Some(parent) = self.path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                ForemanError::UserError(format!(
                    "failed to create events directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                ForemanError::UserError(format!(
                    "failed to open events file '{}': {}",
                    self.path.display(),
                    e
                ))
            })?;

        writeln!(file, "{}", json_line).map_err(|e| {
            ForemanError::UserError(format!(
                "failed to write event to '{}': {}",
                self.path.display(),
                e
            ))
        })?;

        file.sync_all().map_err(|e| {
            ForemanError::UserError(format!(
                "failed to sync events file '{}': {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Read every event in the log, in append order.
    ///
    /// Lines that fail to parse are skipped; a partially written trailing
    /// line must not make the whole log unreadable.
    pub fn read_all(&self) -> Result<Vec<Event>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            ForemanError::UserError(format!(
                "failed to read events file '{}': {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<Event>(line).ok())
            .collect())
    }
}

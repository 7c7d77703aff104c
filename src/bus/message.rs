//! Message and channel types for the coordination bus.

use crate::registry::AgentId;
use crate::store::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Closed set of message types on the bus.
///
/// The wire names are dotted (`task.created`, `agent.ready`, ...); anything
/// outside this set fails to deserialize and is dropped at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.claimed")]
    TaskClaimed,
    #[serde(rename = "task.started")]
    TaskStarted,
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "task.failed")]
    TaskFailed,
    #[serde(rename = "agent.spawned")]
    AgentSpawned,
    #[serde(rename = "agent.ready")]
    AgentReady,
    #[serde(rename = "agent.busy")]
    AgentBusy,
    #[serde(rename = "agent.idle")]
    AgentIdle,
    #[serde(rename = "agent.terminated")]
    AgentTerminated,
    #[serde(rename = "sync.requested")]
    SyncRequested,
    #[serde(rename = "sync.started")]
    SyncStarted,
    #[serde(rename = "sync.completed")]
    SyncCompleted,
    #[serde(rename = "merge.conflict")]
    MergeConflict,
    #[serde(rename = "error")]
    Error,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::TaskCreated => "task.created",
            MessageType::TaskClaimed => "task.claimed",
            MessageType::TaskStarted => "task.started",
            MessageType::TaskCompleted => "task.completed",
            MessageType::TaskFailed => "task.failed",
            MessageType::AgentSpawned => "agent.spawned",
            MessageType::AgentReady => "agent.ready",
            MessageType::AgentBusy => "agent.busy",
            MessageType::AgentIdle => "agent.idle",
            MessageType::AgentTerminated => "agent.terminated",
            MessageType::SyncRequested => "sync.requested",
            MessageType::SyncStarted => "sync.started",
            MessageType::SyncCompleted => "sync.completed",
            MessageType::MergeConflict => "merge.conflict",
            MessageType::Error => "error",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of a bus channel.
///
/// Rendered as `agent:<uuid>`, `task:TASK-NNN`, or `broadcast`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Agent(AgentId),
    Task(TaskId),
    Broadcast,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Agent(id) => write!(f, "agent:{}", id),
            Channel::Task(id) => write!(f, "task:{}", id),
            Channel::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// A message on the coordination bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID, assigned at construction.
    pub id: Uuid,

    /// Message type tag.
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Originator: `coordinator` or an agent name.
    pub sender: String,

    /// Addressee, when the message targets a specific party.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Type-specific payload.
    pub payload: Value,

    /// Publication timestamp.
    pub ts: DateTime<Utc>,
}

impl Message {
    /// Create a message with a fresh ID and the current timestamp.
    pub fn new(kind: MessageType, sender: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            sender: sender.into(),
            target: None,
            payload: Value::Object(serde_json::Map::new()),
            ts: Utc::now(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

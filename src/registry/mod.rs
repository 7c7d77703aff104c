//! Agent registry for foreman.
//!
//! Tracks every agent known to the coordinator: identity, declared
//! capabilities, connection state, current workload, and completion history.
//! The registry is the single source of truth the scorer consults when
//! matching tasks to agents.
//!
//! Connection state is derived, not commanded: an agent is `busy` while it
//! holds at least one assignment and `idle` otherwise, and a connected agent
//! that stays silent past the heartbeat window flips to `disconnected` on
//! the next sweep.

use crate::analyzer::TaskType;
use crate::error::{ForemanError, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Unique identifier for a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(Uuid);

impl AgentId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Connection state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Registered, no workload assessment made yet.
    Connected,
    /// Holds at least one active assignment.
    Busy,
    /// Connected with no active assignment.
    Idle,
    /// Deregistered or timed out; excluded from assignment.
    Disconnected,
}

impl ConnectionState {
    /// Whether the agent may receive assignments.
    pub fn is_available(self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Busy => "busy",
            ConnectionState::Idle => "idle",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Mutable per-agent record.
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    /// Declared capability tags. An empty set marks a generalist that only
    /// receives tasks no specialist matches.
    pub capabilities: Vec<TaskType>,
    pub state: ConnectionState,
    /// Number of currently assigned tasks.
    pub workload: u32,
    /// Number of tasks this agent has driven to done.
    pub completed: u32,
    /// Monotonic registration sequence, used as the deterministic tie-break.
    pub registered_seq: u64,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl Agent {
    /// Refresh the derived busy/idle state. Disconnected is sticky until
    /// re-registration.
    fn refresh_state(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.state = if self.workload > 0 {
            ConnectionState::Busy
        } else {
            ConnectionState::Idle
        };
    }

    /// Number of capability tags matching the given task tags.
    pub fn capability_matches(&self, tags: &[TaskType]) -> usize {
        self.capabilities
            .iter()
            .filter(|cap| tags.contains(cap))
            .count()
    }
}

/// Read-only snapshot of an agent, for status output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub name: String,
    pub capabilities: Vec<TaskType>,
    pub state: ConnectionState,
    pub workload: u32,
    pub completed: u32,
}

impl From<&Agent> for AgentSnapshot {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id,
            name: agent.name.clone(),
            capabilities: agent.capabilities.clone(),
            state: agent.state,
            workload: agent.workload,
            completed: agent.completed,
        }
    }
}

type AgentEntry = Arc<Mutex<Agent>>;

/// In-memory agent registry.
///
/// The outer map lock is held only to locate an entry; per-agent mutation
/// happens under the entry's own mutex.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, AgentEntry>>,
    next_seq: AtomicU64,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new agent.
    ///
    /// Names must be unique among non-disconnected agents; a collision with
    /// a disconnected record is allowed so a crashed agent can rejoin under
    /// its old name (with a fresh ID).
    pub fn register(&self, name: &str, capabilities: Vec<TaskType>) -> Result<AgentId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ForemanError::UserError(
                "agent name must not be empty".to_string(),
            ));
        }

        let mut agents = self.agents.write();

        let taken = agents.values().any(|entry| {
            let agent = entry.lock();
            agent.name == name && agent.state.is_available()
        });
        if taken {
            return Err(ForemanError::DuplicateAgent(name.to_string()));
        }

        let id = AgentId::new();
        let now = Utc::now();
        let agent = Agent {
            id,
            name: name.to_string(),
            capabilities,
            state: ConnectionState::Idle,
            workload: 0,
            completed: 0,
            registered_seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            registered_at: now,
            last_heartbeat: now,
        };

        agents.insert(id, Arc::new(Mutex::new(agent)));
        Ok(id)
    }

    fn entry(&self, id: AgentId) -> Result<AgentEntry> {
        self.agents
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| ForemanError::UnknownAgent(id.to_string()))
    }

    /// Record a heartbeat from a connected agent.
    pub fn heartbeat(&self, id: AgentId) -> Result<()> {
        let entry = self.entry(id)?;
        let mut agent = entry.lock();
        if agent.state == ConnectionState::Disconnected {
            return Err(ForemanError::UnknownAgent(format!(
                "{} (disconnected)",
                agent.name
            )));
        }
        agent.last_heartbeat = Utc::now();
        Ok(())
    }

    /// Mark an agent disconnected. Idempotent.
    pub fn deregister(&self, id: AgentId) -> Result<AgentSnapshot> {
        let entry = self.entry(id)?;
        let mut agent = entry.lock();
        agent.state = ConnectionState::Disconnected;
        Ok(AgentSnapshot::from(&*agent))
    }

    /// Record that a task was assigned to the agent.
    pub fn record_assignment(&self, id: AgentId) -> Result<()> {
        let entry = self.entry(id)?;
        let mut agent = entry.lock();
        agent.workload += 1;
        agent.refresh_state();
        Ok(())
    }

    /// Record that an assignment finished with a clean integration.
    pub fn record_completion(&self, id: AgentId) -> Result<()> {
        let entry = self.entry(id)?;
        let mut agent = entry.lock();
        agent.workload = agent.workload.saturating_sub(1);
        agent.completed += 1;
        agent.refresh_state();
        Ok(())
    }

    /// Record that an assignment ended without completion (failure,
    /// requeue, or forced release).
    pub fn record_release(&self, id: AgentId) -> Result<()> {
        let entry = self.entry(id)?;
        let mut agent = entry.lock();
        agent.workload = agent.workload.saturating_sub(1);
        agent.refresh_state();
        Ok(())
    }

    /// Agents with at least one capability matching `tags`, regardless of
    /// connection state. Filtering disconnected agents is the scorer's job.
    pub fn candidates(&self, tags: &[TaskType]) -> Vec<AgentSnapshot> {
        self.filtered(|agent| {
            !agent.capabilities.is_empty() && agent.capability_matches(tags) > 0
        })
    }

    /// Generalists (agents that declared no capabilities), regardless of
    /// connection state.
    pub fn unspecialized(&self) -> Vec<AgentSnapshot> {
        self.filtered(|agent| agent.capabilities.is_empty())
    }

    fn filtered<F: Fn(&Agent) -> bool>(&self, pred: F) -> Vec<AgentSnapshot> {
        let agents = self.agents.read();
        let mut matched: Vec<(u64, AgentSnapshot)> = agents
            .values()
            .filter_map(|entry| {
                let agent = entry.lock();
                pred(&agent).then(|| (agent.registered_seq, AgentSnapshot::from(&*agent)))
            })
            .collect();
        matched.sort_by_key(|(seq, _)| *seq);
        matched.into_iter().map(|(_, snap)| snap).collect()
    }

    /// Registration sequence for an agent, for deterministic tie-breaks.
    pub fn registration_seq(&self, id: AgentId) -> Result<u64> {
        let entry = self.entry(id)?;
        let agent = entry.lock();
        Ok(agent.registered_seq)
    }

    /// Sweep for agents whose last heartbeat is older than `window`.
    ///
    /// Each expired agent is marked disconnected and returned exactly once.
    pub fn expire(&self, now: DateTime<Utc>, window: Duration) -> Vec<AgentSnapshot> {
        let agents = self.agents.read();
        let mut expired = Vec::new();
        for entry in agents.values() {
            let mut agent = entry.lock();
            if agent.state.is_available() && now - agent.last_heartbeat > window {
                agent.state = ConnectionState::Disconnected;
                expired.push(AgentSnapshot::from(&*agent));
            }
        }
        expired.sort_by_key(|snap| snap.name.clone());
        expired
    }

    /// Snapshot of a single agent.
    pub fn snapshot(&self, id: AgentId) -> Result<AgentSnapshot> {
        let entry = self.entry(id)?;
        let agent = entry.lock();
        Ok(AgentSnapshot::from(&*agent))
    }

    /// Snapshots of all agents, in registration order.
    pub fn snapshot_all(&self) -> Vec<AgentSnapshot> {
        self.filtered(|_| true)
    }
}

//! Durable status reconstruction from the event log.
//!
//! The engine's full state is in memory, but the event log survives it.
//! Replaying `events.ndjson` in append order recovers enough for the
//! `status` command: where every task ended up and which agents are still
//! registered. Replay is a pure fold over the log; running it twice over
//! the same file yields the same view.

use crate::error::Result;
use crate::events::{Event, EventAction, EventLog};
use std::collections::BTreeMap;

/// Coarse task phase derivable from the log alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayedTaskState {
    Pending,
    Assigned,
    InProgress,
    Integrating,
    Done,
    Failed,
}

impl ReplayedTaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplayedTaskState::Pending => "pending",
            ReplayedTaskState::Assigned => "assigned",
            ReplayedTaskState::InProgress => "in_progress",
            ReplayedTaskState::Integrating => "integrating",
            ReplayedTaskState::Done => "done",
            ReplayedTaskState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReplayedTaskState::Done | ReplayedTaskState::Failed)
    }
}

/// Status view rebuilt from the event log.
#[derive(Debug, Default)]
pub struct DurableStatus {
    /// Task ID string -> last known state, in ID order.
    pub tasks: BTreeMap<String, ReplayedTaskState>,
    /// Agent names currently registered (registered minus departed).
    pub agents: Vec<String>,
    /// Total events replayed.
    pub events_replayed: usize,
}

impl DurableStatus {
    /// Read and fold the whole event log.
    pub fn from_log(log: &EventLog) -> Result<Self> {
        Ok(Self::from_events(&log.read_all()?))
    }

    /// Fold a list of events into a status view.
    pub fn from_events(events: &[Event]) -> Self {
        let mut status = Self {
            events_replayed: events.len(),
            ..Self::default()
        };
        let mut agents: BTreeMap<String, bool> = BTreeMap::new();

        for event in events {
            if let Some(state) = task_state_for(event.action)
                && let Some(task) = &event.task
            {
                status.tasks.insert(task.clone(), state);
            }

            match event.action {
                EventAction::AgentRegistered => {
                    if let Some(name) = detail_name(event) {
                        agents.insert(name, true);
                    }
                }
                EventAction::AgentDeregistered | EventAction::AgentTimedOut => {
                    if let Some(name) = detail_name(event) {
                        agents.insert(name, false);
                    }
                }
                _ => {}
            }
        }

        status.agents = agents
            .into_iter()
            .filter_map(|(name, registered)| registered.then_some(name))
            .collect();
        status
    }

    pub fn count(&self, state: ReplayedTaskState) -> usize {
        self.tasks.values().filter(|s| **s == state).count()
    }

    /// Tasks neither done nor failed.
    pub fn in_flight(&self) -> usize {
        self.tasks.values().filter(|s| !s.is_terminal()).count()
    }
}

fn task_state_for(action: EventAction) -> Option<ReplayedTaskState> {
    match action {
        EventAction::TaskSubmitted | EventAction::TaskRequeued => {
            Some(ReplayedTaskState::Pending)
        }
        EventAction::TaskAssigned => Some(ReplayedTaskState::Assigned),
        EventAction::TaskStarted => Some(ReplayedTaskState::InProgress),
        EventAction::TaskIntegrating => Some(ReplayedTaskState::Integrating),
        EventAction::TaskDone => Some(ReplayedTaskState::Done),
        EventAction::TaskFailed => Some(ReplayedTaskState::Failed),
        _ => None,
    }
}

fn detail_name(event: &Event) -> Option<String> {
    event
        .details
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(action: EventAction, task: Option<&str>) -> Event {
        let event = Event::new(action);
        match task {
            Some(id) => event.with_task(id),
            None => event,
        }
    }

    fn agent_event(action: EventAction, name: &str) -> Event {
        Event::new(action).with_details(json!({"name": name}))
    }

    #[test]
    fn replay_tracks_last_task_state() {
        let events = vec![
            event(EventAction::TaskSubmitted, Some("TASK-001")),
            event(EventAction::TaskAssigned, Some("TASK-001")),
            event(EventAction::TaskStarted, Some("TASK-001")),
            event(EventAction::TaskIntegrating, Some("TASK-001")),
            event(EventAction::TaskDone, Some("TASK-001")),
            event(EventAction::TaskSubmitted, Some("TASK-002")),
        ];

        let status = DurableStatus::from_events(&events);
        assert_eq!(status.tasks["TASK-001"], ReplayedTaskState::Done);
        assert_eq!(status.tasks["TASK-002"], ReplayedTaskState::Pending);
        assert_eq!(status.count(ReplayedTaskState::Done), 1);
        assert_eq!(status.in_flight(), 1);
        assert_eq!(status.events_replayed, 6);
    }

    #[test]
    fn requeue_returns_task_to_pending() {
        let events = vec![
            event(EventAction::TaskSubmitted, Some("TASK-001")),
            event(EventAction::TaskAssigned, Some("TASK-001")),
            event(EventAction::TaskRequeued, Some("TASK-001")),
        ];

        let status = DurableStatus::from_events(&events);
        assert_eq!(status.tasks["TASK-001"], ReplayedTaskState::Pending);
    }

    #[test]
    fn departed_agents_are_excluded() {
        let events = vec![
            agent_event(EventAction::AgentRegistered, "coder"),
            agent_event(EventAction::AgentRegistered, "tester"),
            agent_event(EventAction::AgentTimedOut, "tester"),
        ];

        let status = DurableStatus::from_events(&events);
        assert_eq!(status.agents, vec!["coder".to_string()]);
    }

    #[test]
    fn rejoined_agent_counts_again() {
        let events = vec![
            agent_event(EventAction::AgentRegistered, "coder"),
            agent_event(EventAction::AgentDeregistered, "coder"),
            agent_event(EventAction::AgentRegistered, "coder"),
        ];

        let status = DurableStatus::from_events(&events);
        assert_eq!(status.agents, vec!["coder".to_string()]);
    }

    #[test]
    fn replay_is_idempotent() {
        let events = vec![
            event(EventAction::TaskSubmitted, Some("TASK-001")),
            event(EventAction::TaskDone, Some("TASK-001")),
            // A duplicated terminal event changes nothing.
            event(EventAction::TaskDone, Some("TASK-001")),
        ];

        let status = DurableStatus::from_events(&events);
        assert_eq!(status.tasks.len(), 1);
        assert_eq!(status.tasks["TASK-001"], ReplayedTaskState::Done);
    }

    #[test]
    fn empty_log_is_empty_status() {
        let status = DurableStatus::from_events(&[]);
        assert!(status.tasks.is_empty());
        assert!(status.agents.is_empty());
        assert_eq!(status.events_replayed, 0);
    }
}

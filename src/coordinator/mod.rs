//! The coordinator: wires the registry, store, analyzer, scorer, bus,
//! workspace manager, and merge coordinator into one engine.
//!
//! All write paths flow through this module so the pieces stay consistent:
//! a task claim, its workspace, the agent's workload counter, the bus
//! announcements, and the event log entries move together. Incoming wire
//! messages that do not fit the current state (duplicates, stale reports,
//! unknown IDs) are absorbed as no-ops, so replaying a message stream
//! converges on the same state instead of erroring halfway.

pub mod recovery;

use crate::analyzer::{ComplexityAnalyzer, KeywordAnalyzer, TaskType};
use crate::bus::{Channel, Message, MessageBus, MessageType, MirrorWriter};
use crate::config::Config;
use crate::context::CoordContext;
use crate::error::{ForemanError, Result};
use crate::events::{Event, EventAction, EventLog};
use crate::merge::{MergeCoordinator, MergeOutcome};
use crate::registry::{AgentId, AgentRegistry, AgentSnapshot, ConnectionState};
use crate::scorer;
use crate::store::{RequeueOutcome, TaskId, TaskRecord, TaskState, TaskStore};
use crate::workspace::WorkspaceManager;
use chrono::{DateTime, Utc};
use serde_json::json;

/// Sender name the coordinator uses on the bus.
const COORDINATOR: &str = "coordinator";

/// Point-in-time view of the engine, for status output.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub agents: Vec<AgentSnapshot>,
    pub tasks: Vec<TaskRecord>,
}

impl StatusSnapshot {
    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }

    /// Tasks still moving through the pipeline.
    pub fn active_tasks(&self) -> Vec<&TaskRecord> {
        self.tasks.iter().filter(|t| !t.state.is_terminal()).collect()
    }

    /// Tasks that reached `done` or `failed`.
    pub fn completed_tasks(&self) -> Vec<&TaskRecord> {
        self.tasks.iter().filter(|t| t.state.is_terminal()).collect()
    }

    pub fn connected_agents(&self) -> usize {
        self.agents
            .iter()
            .filter(|a| a.state != ConnectionState::Disconnected)
            .count()
    }
}

/// Central coordination engine.
pub struct Coordinator {
    ctx: CoordContext,
    config: Config,
    registry: AgentRegistry,
    store: TaskStore,
    analyzer: Box<dyn ComplexityAnalyzer>,
    bus: MessageBus,
    workspaces: WorkspaceManager,
    merger: MergeCoordinator,
    events: EventLog,
}

impl Coordinator {
    /// Build a coordinator over a resolved repository context.
    pub fn new(ctx: CoordContext, config: Config) -> Self {
        let bus = MessageBus::new(config.channel_capacity)
            .with_mirror(MirrorWriter::new(ctx.mirror_file()));
        let workspaces = WorkspaceManager::new(ctx.clone(), config.baseline_branch.clone());
        let merger = MergeCoordinator::new(ctx.clone(), config.baseline_branch.clone());
        let events = EventLog::new(ctx.events_file());

        Self {
            ctx,
            config,
            registry: AgentRegistry::new(),
            store: TaskStore::new(),
            analyzer: Box::new(KeywordAnalyzer),
            bus,
            workspaces,
            merger,
            events,
        }
    }

    /// Load config for a resolved context, prepare the state directories,
    /// and build the engine.
    pub fn open(ctx: CoordContext) -> Result<Self> {
        let config = Config::load(&ctx)?;
        ctx.ensure_state_dirs()?;
        Ok(Self::new(ctx, config))
    }

    /// Swap in a different complexity analyzer.
    pub fn with_analyzer(mut self, analyzer: Box<dyn ComplexityAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn context(&self) -> &CoordContext {
        &self.ctx
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    // ---- intake ----------------------------------------------------------

    /// Accept a new task: analyze, store, announce.
    pub async fn submit_task(
        &self,
        description: &str,
        depends_on: Vec<TaskId>,
    ) -> Result<TaskId> {
        let profile = self.analyzer.analyze(description);
        let id = self.store.insert(description, profile.clone(), depends_on.clone())?;

        self.events.append(
            &Event::new(EventAction::TaskSubmitted)
                .with_task(id.to_string())
                .with_details(json!({
                    "description": description,
                    "tags": profile.tags,
                    "size": profile.size,
                    "depends_on": depends_on.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
                })),
        )?;

        self.bus
            .publish(
                Channel::Broadcast,
                Message::new(MessageType::TaskCreated, COORDINATOR).with_payload(json!({
                    "task": id.to_string(),
                    "description": description,
                    "tags": profile.tags,
                    "size": profile.size,
                })),
            )
            .await;

        tracing::info!(task = %id, size = %profile.size, "task submitted");
        Ok(id)
    }

    /// Register a new agent and announce it.
    pub async fn register_agent(
        &self,
        name: &str,
        capabilities: Vec<TaskType>,
    ) -> Result<AgentId> {
        let id = self.registry.register(name, capabilities.clone())?;

        self.events.append(&Event::new(EventAction::AgentRegistered).with_details(json!({
            "agent": id.to_string(),
            "name": name,
            "capabilities": capabilities,
        })))?;

        self.bus
            .publish(
                Channel::Broadcast,
                Message::new(MessageType::AgentSpawned, COORDINATOR).with_payload(json!({
                    "agent": id.to_string(),
                    "name": name,
                    "capabilities": capabilities,
                })),
            )
            .await;

        tracing::info!(agent = %id, name, "agent registered");
        Ok(id)
    }

    /// Record an agent heartbeat.
    pub fn heartbeat(&self, agent: AgentId) -> Result<()> {
        self.registry.heartbeat(agent)
    }

    /// Deregister an agent, releasing everything it holds.
    pub async fn deregister_agent(&self, agent: AgentId) -> Result<()> {
        let snapshot = self.registry.deregister(agent)?;
        self.release_agent_holdings(agent, "agent disconnected").await?;

        self.events.append(&Event::new(EventAction::AgentDeregistered).with_details(json!({
            "agent": agent.to_string(),
            "name": snapshot.name,
        })))?;

        self.bus
            .publish(
                Channel::Broadcast,
                Message::new(MessageType::AgentTerminated, COORDINATOR).with_payload(json!({
                    "agent": agent.to_string(),
                    "name": snapshot.name,
                })),
            )
            .await;

        tracing::info!(agent = %agent, name = %snapshot.name, "agent deregistered");
        Ok(())
    }

    /// Requeue every active task an agent holds and discard its workspaces.
    async fn release_agent_holdings(&self, agent: AgentId, reason: &str) -> Result<()> {
        for task in self.store.active_for_agent(agent) {
            self.requeue_task(task.id, agent, reason).await?;
        }
        // Orphaned sessions with no matching active task still get cleaned up.
        for session in self.workspaces.live_sessions_for_agent(agent) {
            self.discard_workspace(session.task).await?;
        }
        Ok(())
    }

    // ---- assignment ------------------------------------------------------

    /// Run one scoring pass: try to assign every eligible task.
    ///
    /// Returns the assignments made. A task with no willing agent simply
    /// stays pending until the next pass.
    pub async fn scoring_pass(&self) -> Result<Vec<(TaskId, AgentId)>> {
        let mut assignments = Vec::new();

        for task in self.store.eligible() {
            let specialists = self.registry.candidates(&task.profile.tags);
            let fallback = self.registry.unspecialized();

            let Some(agent) = scorer::select(&task.profile.tags, &specialists, &fallback)
            else {
                continue;
            };

            match self.assign(&task, agent).await {
                Ok(()) => assignments.push((task.id, agent)),
                // Someone else claimed it between eligibility and claim.
                Err(e) if e.is_transient() => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(assignments)
    }

    async fn assign(&self, task: &TaskRecord, agent: AgentId) -> Result<()> {
        self.store.claim(task.id, agent)?;

        let session = match self.workspaces.provision(task.id, &task.description, agent) {
            Ok(session) => session,
            Err(e) => {
                // Workspace failure is not the agent's fault: put the task
                // back and surface the failure through the retry budget.
                tracing::warn!(task = %task.id, error = %e, "workspace provisioning failed");
                self.requeue_task(task.id, agent, &format!("provisioning failed: {}", e))
                    .await?;
                return Ok(());
            }
        };

        self.registry.record_assignment(agent)?;

        self.events.append(
            &Event::new(EventAction::TaskAssigned)
                .with_task(task.id.to_string())
                .with_details(json!({"agent": agent.to_string()})),
        )?;
        self.events.append(
            &Event::new(EventAction::WorkspaceProvisioned)
                .with_task(task.id.to_string())
                .with_details(json!({
                    "branch": session.branch,
                    "base_rev": session.base_rev,
                })),
        )?;

        self.bus
            .publish(
                Channel::Agent(agent),
                Message::new(MessageType::TaskCreated, COORDINATOR)
                    .with_target(agent.to_string())
                    .with_payload(json!({
                        "task": task.id.to_string(),
                        "description": task.description,
                        "branch": session.branch,
                        "worktree": session.path.to_string_lossy(),
                    })),
            )
            .await;
        self.publish_agent_load(agent).await?;

        tracing::info!(task = %task.id, agent = %agent, branch = %session.branch, "task assigned");
        Ok(())
    }

    /// Announce an agent's busy/idle transition after a workload change.
    async fn publish_agent_load(&self, agent: AgentId) -> Result<()> {
        let snapshot = self.registry.snapshot(agent)?;
        let kind = match snapshot.state {
            ConnectionState::Busy => MessageType::AgentBusy,
            ConnectionState::Idle => MessageType::AgentIdle,
            _ => return Ok(()),
        };
        self.bus
            .publish(
                Channel::Broadcast,
                Message::new(kind, COORDINATOR).with_payload(json!({
                    "agent": agent.to_string(),
                    "workload": snapshot.workload,
                })),
            )
            .await;
        Ok(())
    }

    // ---- wire message handling -------------------------------------------

    /// Apply one incoming wire message.
    ///
    /// Messages that do not match the current state are logged and dropped;
    /// only infrastructure failures (event log I/O) propagate as errors.
    pub async fn handle_message(&self, message: Message) -> Result<()> {
        match message.kind {
            MessageType::AgentReady => self.on_agent_ready(&message).await,
            MessageType::AgentTerminated => self.on_agent_terminated(&message).await,
            MessageType::TaskClaimed => self.on_task_claimed(&message).await,
            MessageType::TaskCompleted => self.on_task_completed(&message).await,
            MessageType::TaskFailed => self.on_task_failed(&message).await,
            other => {
                tracing::debug!(kind = %other, sender = %message.sender, "message ignored");
                Ok(())
            }
        }
    }

    /// An agent announced itself: register it from the message payload.
    async fn on_agent_ready(&self, message: &Message) -> Result<()> {
        let Some(name) = message.payload.get("name").and_then(|v| v.as_str()) else {
            tracing::warn!(kind = %message.kind, "malformed message payload dropped");
            return Ok(());
        };
        let capabilities: Vec<TaskType> = message
            .payload
            .get("capabilities")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        match self.register_agent(name, capabilities).await {
            Ok(_) => Ok(()),
            // A re-announcement from a connected agent is not an error.
            Err(ForemanError::DuplicateAgent(_)) => {
                tracing::debug!(name, "repeated agent.ready ignored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// An agent announced its departure.
    async fn on_agent_terminated(&self, message: &Message) -> Result<()> {
        let Some(agent) = message
            .payload
            .get("agent")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
        else {
            tracing::warn!(kind = %message.kind, "malformed message payload dropped");
            return Ok(());
        };
        match self.deregister_agent(agent).await {
            Ok(()) => Ok(()),
            Err(ForemanError::UnknownAgent(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn message_ids(message: &Message) -> Option<(TaskId, AgentId)> {
        let task = message.payload.get("task")?.as_str()?.parse().ok()?;
        let agent = message.payload.get("agent")?.as_str()?.parse().ok()?;
        Some((task, agent))
    }

    /// Agent acknowledged its assignment: assigned -> in_progress.
    async fn on_task_claimed(&self, message: &Message) -> Result<()> {
        let Some((task, agent)) = Self::message_ids(message) else {
            tracing::warn!(kind = %message.kind, "malformed message payload dropped");
            return Ok(());
        };

        if !self.store.ack_started(task, agent)? {
            tracing::debug!(task = %task, "stale start ack ignored");
            return Ok(());
        }
        self.workspaces.activate(task)?;

        self.events.append(
            &Event::new(EventAction::TaskStarted)
                .with_task(task.to_string())
                .with_details(json!({"agent": agent.to_string()})),
        )?;

        self.bus
            .publish(
                Channel::Task(task),
                Message::new(MessageType::TaskStarted, COORDINATOR).with_payload(json!({
                    "task": task.to_string(),
                    "agent": agent.to_string(),
                })),
            )
            .await;

        tracing::info!(task = %task, agent = %agent, "task started");
        Ok(())
    }

    /// Agent reported completion: integrate its branch into the baseline.
    async fn on_task_completed(&self, message: &Message) -> Result<()> {
        let Some((task, agent)) = Self::message_ids(message) else {
            tracing::warn!(kind = %message.kind, "malformed message payload dropped");
            return Ok(());
        };

        // Exactly one completion report wins; duplicates land here as false.
        if !self.store.try_begin_integration(task, agent)? {
            tracing::debug!(task = %task, "stale completion report ignored");
            return Ok(());
        }

        let session = self.workspaces.mark_ready(task)?;
        self.events
            .append(&Event::new(EventAction::TaskIntegrating).with_task(task.to_string()))?;

        self.bus
            .publish(
                Channel::Task(task),
                Message::new(MessageType::SyncRequested, COORDINATOR)
                    .with_payload(json!({"task": task.to_string(), "branch": session.branch})),
            )
            .await;
        self.bus
            .publish(
                Channel::Broadcast,
                Message::new(MessageType::SyncStarted, COORDINATOR)
                    .with_payload(json!({"task": task.to_string()})),
            )
            .await;

        let result = self.merger.integrate(&session).await;
        match result.outcome {
            MergeOutcome::Clean { revision } => self.on_merge_clean(task, agent, revision).await,
            MergeOutcome::Conflict { paths } => self.on_merge_conflict(task, agent, paths).await,
            MergeOutcome::Aborted { reason } => self.on_merge_aborted(task, agent, reason).await,
        }
    }

    async fn on_merge_clean(&self, task: TaskId, agent: AgentId, revision: String) -> Result<()> {
        self.store.complete(task)?;
        self.workspaces.finalize_merged(task)?;
        self.registry.record_completion(agent)?;

        self.events.append(
            &Event::new(EventAction::MergeClean)
                .with_task(task.to_string())
                .with_details(json!({"revision": revision})),
        )?;
        self.events
            .append(&Event::new(EventAction::TaskDone).with_task(task.to_string()))?;

        self.bus
            .publish(
                Channel::Broadcast,
                Message::new(MessageType::SyncCompleted, COORDINATOR).with_payload(json!({
                    "task": task.to_string(),
                    "revision": revision,
                })),
            )
            .await;
        self.bus
            .publish(
                Channel::Task(task),
                Message::new(MessageType::TaskCompleted, COORDINATOR)
                    .with_payload(json!({"task": task.to_string(), "revision": revision})),
            )
            .await;
        self.publish_agent_load(agent).await?;

        tracing::info!(task = %task, revision = %revision, "task integrated");
        Ok(())
    }

    async fn on_merge_conflict(
        &self,
        task: TaskId,
        agent: AgentId,
        paths: Vec<String>,
    ) -> Result<()> {
        let error = ForemanError::MergeConflict {
            task: task.to_string(),
            paths: paths.clone(),
        };
        self.store.fail(task, &error.to_string())?;
        self.discard_workspace(task).await?;
        self.registry.record_release(agent)?;

        self.events.append(
            &Event::new(EventAction::MergeConflict)
                .with_task(task.to_string())
                .with_details(json!({"paths": paths})),
        )?;
        self.events.append(
            &Event::new(EventAction::TaskFailed)
                .with_task(task.to_string())
                .with_details(json!({"error": error.to_string()})),
        )?;

        self.bus
            .publish(
                Channel::Broadcast,
                Message::new(MessageType::MergeConflict, COORDINATOR).with_payload(json!({
                    "task": task.to_string(),
                    "paths": paths,
                })),
            )
            .await;
        self.bus
            .publish(
                Channel::Task(task),
                Message::new(MessageType::TaskFailed, COORDINATOR)
                    .with_payload(json!({"task": task.to_string(), "error": error.to_string()})),
            )
            .await;
        self.publish_agent_load(agent).await?;

        tracing::warn!(task = %task, ?paths, "merge conflict, task failed");
        Ok(())
    }

    async fn on_merge_aborted(&self, task: TaskId, agent: AgentId, reason: String) -> Result<()> {
        let error = format!("integration aborted: {}", reason);
        self.store.fail(task, &error)?;
        self.discard_workspace(task).await?;
        self.registry.record_release(agent)?;

        self.events.append(
            &Event::new(EventAction::MergeAborted)
                .with_task(task.to_string())
                .with_details(json!({"reason": reason})),
        )?;
        self.events.append(
            &Event::new(EventAction::TaskFailed)
                .with_task(task.to_string())
                .with_details(json!({"error": error})),
        )?;

        self.bus
            .publish(
                Channel::Broadcast,
                Message::new(MessageType::Error, COORDINATOR)
                    .with_payload(json!({"task": task.to_string(), "error": error})),
            )
            .await;
        self.bus
            .publish(
                Channel::Task(task),
                Message::new(MessageType::TaskFailed, COORDINATOR)
                    .with_payload(json!({"task": task.to_string(), "error": error})),
            )
            .await;
        self.publish_agent_load(agent).await?;

        tracing::error!(task = %task, reason = %reason, "integration aborted, task failed");
        Ok(())
    }

    /// Agent reported it could not finish the task.
    async fn on_task_failed(&self, message: &Message) -> Result<()> {
        let Some((task, agent)) = Self::message_ids(message) else {
            tracing::warn!(kind = %message.kind, "malformed message payload dropped");
            return Ok(());
        };

        let reason = message
            .payload
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("agent reported failure");

        if !self
            .store
            .get(task)
            .map(|t| t.assigned_agent == Some(agent) && t.state.is_active_assignment())
            .unwrap_or(false)
        {
            tracing::debug!(task = %task, "stale failure report ignored");
            return Ok(());
        }

        self.requeue_task(task, agent, reason).await
    }

    // ---- requeue and sweeps ----------------------------------------------

    /// Release a task back to the queue (or fail it past the retry limit),
    /// dropping its workspace and the agent's workload.
    async fn requeue_task(&self, task: TaskId, agent: AgentId, reason: &str) -> Result<()> {
        let outcome = self.store.requeue(task, reason, self.config.retry_limit)?;
        self.discard_workspace(task).await?;
        self.registry.record_release(agent)?;
        self.publish_agent_load(agent).await?;

        match outcome {
            RequeueOutcome::Requeued(retries) => {
                self.events.append(
                    &Event::new(EventAction::TaskRequeued)
                        .with_task(task.to_string())
                        .with_details(json!({"reason": reason, "retries": retries})),
                )?;
                // Announce the cancelled attempt, then the retry. No agent
                // acknowledgment is required for either.
                self.bus
                    .publish(
                        Channel::Task(task),
                        Message::new(MessageType::TaskFailed, COORDINATOR).with_payload(json!({
                            "task": task.to_string(),
                            "error": reason,
                            "retries": retries,
                        })),
                    )
                    .await;
                self.bus
                    .publish(
                        Channel::Broadcast,
                        Message::new(MessageType::TaskCreated, COORDINATOR).with_payload(json!({
                            "task": task.to_string(),
                            "retry": true,
                            "retries": retries,
                        })),
                    )
                    .await;
                tracing::info!(task = %task, retries, reason, "task requeued");
            }
            RequeueOutcome::RetriesExhausted => {
                self.events.append(
                    &Event::new(EventAction::TaskFailed)
                        .with_task(task.to_string())
                        .with_details(json!({"error": format!("retry limit exceeded: {}", reason)})),
                )?;
                self.bus
                    .publish(
                        Channel::Task(task),
                        Message::new(MessageType::TaskFailed, COORDINATOR).with_payload(json!({
                            "task": task.to_string(),
                            "error": format!("retry limit exceeded: {}", reason),
                        })),
                    )
                    .await;
                tracing::warn!(task = %task, reason, "retry limit exceeded, task failed");
            }
        }
        Ok(())
    }

    async fn discard_workspace(&self, task: TaskId) -> Result<()> {
        let had_session = self
            .workspaces
            .session(task)
            .is_some_and(|s| s.state.is_live());
        self.workspaces.discard(task);
        if had_session {
            self.events
                .append(&Event::new(EventAction::WorkspaceDiscarded).with_task(task.to_string()))?;
        }
        Ok(())
    }

    /// Requeue assigned or in-progress tasks that blew their deadline.
    pub async fn expire_deadlines(&self, now: DateTime<Utc>) -> Result<Vec<TaskId>> {
        let mut expired = Vec::new();
        for task in self.store.overdue(now, self.config.task_deadline()) {
            let Some(agent) = task.assigned_agent else {
                continue;
            };
            let reason =
                ForemanError::AgentTimeout(format!("{} exceeded the task deadline", agent))
                    .to_string();
            self.requeue_task(task.id, agent, &reason).await?;
            expired.push(task.id);
        }
        Ok(expired)
    }

    /// Disconnect agents that missed their heartbeat window and release
    /// everything they held.
    pub async fn expire_agents(&self, now: DateTime<Utc>) -> Result<Vec<AgentId>> {
        let window = self.config.heartbeat_window();
        let mut expired = Vec::new();

        for snapshot in self.registry.expire(now, window) {
            let reason = ForemanError::AgentTimeout(format!(
                "'{}' missed its heartbeat window",
                snapshot.name
            ))
            .to_string();
            self.release_agent_holdings(snapshot.id, &reason).await?;
            self.events.append(&Event::new(EventAction::AgentTimedOut).with_details(json!({
                "agent": snapshot.id.to_string(),
                "name": snapshot.name,
            })))?;
            self.bus
                .publish(
                    Channel::Broadcast,
                    Message::new(MessageType::AgentTerminated, COORDINATOR).with_payload(json!({
                        "agent": snapshot.id.to_string(),
                        "name": snapshot.name,
                        "reason": "heartbeat timeout",
                    })),
                )
                .await;
            tracing::warn!(agent = %snapshot.id, name = %snapshot.name, "agent timed out");
            expired.push(snapshot.id);
        }
        Ok(expired)
    }

    /// One maintenance cycle: expire silent agents and overdue tasks, then
    /// try to assign whatever is eligible.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        self.expire_agents(now).await?;
        self.expire_deadlines(now).await?;
        self.scoring_pass().await?;
        Ok(())
    }

    /// Record of a single task.
    pub fn task(&self, id: TaskId) -> Result<TaskRecord> {
        self.store.get(id)
    }

    /// Display name of a registered agent.
    pub fn agent_name(&self, agent: AgentId) -> Result<String> {
        Ok(self.registry.snapshot(agent)?.name)
    }

    /// Current snapshot of agents and tasks.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            agents: self.registry.snapshot_all(),
            tasks: self.store.snapshot_all(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git;
    use crate::test_support::create_test_repo;
    use serde_json::json;

    async fn coordinator(temp: &tempfile::TempDir) -> Coordinator {
        let ctx = CoordContext::resolve_from(temp.path()).unwrap();
        ctx.ensure_state_dirs().unwrap();
        Coordinator::new(ctx, Config::default())
    }

    fn wire(kind: MessageType, task: TaskId, agent: AgentId) -> Message {
        Message::new(kind, "agent").with_payload(json!({
            "task": task.to_string(),
            "agent": agent.to_string(),
        }))
    }

    fn commit_file(dir: &std::path::Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
        git::run_git(dir, &["add", name]).unwrap();
        git::run_git(dir, &["commit", "-m", "agent work"]).unwrap();
    }

    async fn assign_one(
        coord: &Coordinator,
        description: &str,
        agent_name: &str,
        capabilities: Vec<TaskType>,
    ) -> (TaskId, AgentId) {
        let task = coord.submit_task(description, vec![]).await.unwrap();
        let agent = coord.register_agent(agent_name, capabilities).await.unwrap();
        let assignments = coord.scoring_pass().await.unwrap();
        assert_eq!(assignments, vec![(task, agent)]);
        (task, agent)
    }

    #[tokio::test]
    async fn submit_assigns_to_matching_specialist() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;

        let coder = coord
            .register_agent("coder", vec![TaskType::Implementation])
            .await
            .unwrap();
        coord
            .register_agent("scribe", vec![TaskType::Documentation])
            .await
            .unwrap();

        let task = coord.submit_task("implement the login flow", vec![]).await.unwrap();
        let assignments = coord.scoring_pass().await.unwrap();

        assert_eq!(assignments, vec![(task, coder)]);
        assert_eq!(coord.store.get(task).unwrap().state, TaskState::Assigned);
        assert!(coord.workspaces.session(task).is_some());
    }

    #[tokio::test]
    async fn unmatched_task_falls_back_to_generalist() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;

        coord
            .register_agent("coder", vec![TaskType::Implementation])
            .await
            .unwrap();
        let generalist = coord.register_agent("anyone", vec![]).await.unwrap();

        let task = coord.submit_task("deploy the release", vec![]).await.unwrap();
        let assignments = coord.scoring_pass().await.unwrap();
        assert_eq!(assignments, vec![(task, generalist)]);
    }

    #[tokio::test]
    async fn task_with_no_agent_stays_pending() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;

        let task = coord.submit_task("implement the login flow", vec![]).await.unwrap();
        assert!(coord.scoring_pass().await.unwrap().is_empty());
        assert_eq!(coord.store.get(task).unwrap().state, TaskState::Pending);
    }

    #[tokio::test]
    async fn happy_path_lands_work_on_baseline() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;
        let before = git::rev_parse(temp.path(), "main").unwrap();

        let (task, agent) = assign_one(
            &coord,
            "implement the login flow",
            "coder",
            vec![TaskType::Implementation],
        )
        .await;

        coord
            .handle_message(wire(MessageType::TaskClaimed, task, agent))
            .await
            .unwrap();
        assert_eq!(coord.store.get(task).unwrap().state, TaskState::InProgress);

        let session = coord.workspaces.session(task).unwrap();
        commit_file(&session.path, "login.rs", "fn login() {}\n");

        coord
            .handle_message(wire(MessageType::TaskCompleted, task, agent))
            .await
            .unwrap();

        assert_eq!(coord.store.get(task).unwrap().state, TaskState::Done);
        assert_ne!(git::rev_parse(temp.path(), "main").unwrap(), before);
        assert!(temp.path().join("login.rs").exists());
        assert!(!session.path.exists());
        assert!(!git::branch_exists(temp.path(), &session.branch).unwrap());

        let snapshot = coord.registry.snapshot(agent).unwrap();
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.workload, 0);
    }

    #[tokio::test]
    async fn merge_conflict_fails_task_and_preserves_baseline() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;

        let first_agent = coord
            .register_agent("first", vec![TaskType::Implementation])
            .await
            .unwrap();
        let second_agent = coord
            .register_agent("second", vec![TaskType::Implementation])
            .await
            .unwrap();
        let first = coord.submit_task("implement login", vec![]).await.unwrap();
        let second = coord.submit_task("implement logout", vec![]).await.unwrap();
        coord.scoring_pass().await.unwrap();

        for (task, agent) in [(first, first_agent), (second, second_agent)] {
            coord
                .handle_message(wire(MessageType::TaskClaimed, task, agent))
                .await
                .unwrap();
        }

        // Both touch the same file with different content.
        let first_session = coord.workspaces.session(first).unwrap();
        let second_session = coord.workspaces.session(second).unwrap();
        commit_file(&first_session.path, "shared.rs", "// first\n");
        commit_file(&second_session.path, "shared.rs", "// second\n");

        coord
            .handle_message(wire(MessageType::TaskCompleted, first, first_agent))
            .await
            .unwrap();
        let baseline = git::rev_parse(temp.path(), "main").unwrap();

        coord
            .handle_message(wire(MessageType::TaskCompleted, second, second_agent))
            .await
            .unwrap();

        let failed = coord.store.get(second).unwrap();
        assert_eq!(failed.state, TaskState::Failed);
        assert!(failed.error.as_deref().unwrap().contains("shared.rs"));
        assert_eq!(git::rev_parse(temp.path(), "main").unwrap(), baseline);
        assert!(!second_session.path.exists());
    }

    #[tokio::test]
    async fn dependent_task_waits_for_its_dependency() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;

        let agent = coord.register_agent("anyone", vec![]).await.unwrap();
        let first = coord.submit_task("implement login", vec![]).await.unwrap();
        let second = coord
            .submit_task("test login", vec![first])
            .await
            .unwrap();

        let assignments = coord.scoring_pass().await.unwrap();
        assert_eq!(assignments, vec![(first, agent)]);
        assert_eq!(coord.store.get(second).unwrap().state, TaskState::Pending);

        coord
            .handle_message(wire(MessageType::TaskClaimed, first, agent))
            .await
            .unwrap();
        let session = coord.workspaces.session(first).unwrap();
        commit_file(&session.path, "login.rs", "fn login() {}\n");
        coord
            .handle_message(wire(MessageType::TaskCompleted, first, agent))
            .await
            .unwrap();

        let assignments = coord.scoring_pass().await.unwrap();
        assert_eq!(assignments, vec![(second, agent)]);
    }

    #[tokio::test]
    async fn agent_failure_report_requeues_with_retry() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;

        let (task, agent) = assign_one(
            &coord,
            "implement the login flow",
            "coder",
            vec![TaskType::Implementation],
        )
        .await;

        coord
            .handle_message(
                wire(MessageType::TaskFailed, task, agent)
                    .with_payload(json!({
                        "task": task.to_string(),
                        "agent": agent.to_string(),
                        "error": "tooling broke",
                    })),
            )
            .await
            .unwrap();

        let record = coord.store.get(task).unwrap();
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.retries, 1);
        assert!(coord.workspaces.session(task).is_none_or(|s| !s.state.is_live()));
        assert_eq!(coord.registry.snapshot(agent).unwrap().workload, 0);
    }

    #[tokio::test]
    async fn deregister_releases_tasks_and_workspaces() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;

        let (task, agent) = assign_one(
            &coord,
            "implement the login flow",
            "coder",
            vec![TaskType::Implementation],
        )
        .await;
        let session = coord.workspaces.session(task).unwrap();

        coord.deregister_agent(agent).await.unwrap();

        let record = coord.store.get(task).unwrap();
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.retries, 1);
        assert!(record.assigned_agent.is_none());
        assert!(!session.path.exists());
        assert_eq!(
            coord.registry.snapshot(agent).unwrap().state,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn heartbeat_timeout_releases_holdings() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;

        let (task, agent) = assign_one(
            &coord,
            "implement the login flow",
            "coder",
            vec![TaskType::Implementation],
        )
        .await;

        let later = Utc::now() + chrono::Duration::seconds(3600);
        let expired = coord.expire_agents(later).await.unwrap();
        assert_eq!(expired, vec![agent]);
        assert_eq!(coord.store.get(task).unwrap().state, TaskState::Pending);

        // The requeue reason carries the agent-timeout taxonomy message.
        let events = coord.events.read_all().unwrap();
        let requeued = events
            .iter()
            .find(|e| e.action == EventAction::TaskRequeued)
            .unwrap();
        assert!(
            requeued.details["reason"]
                .as_str()
                .unwrap()
                .contains("agent timeout")
        );
    }

    #[tokio::test]
    async fn tick_sweeps_expired_agents_and_reassigns_work() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;

        let (task, agent) = assign_one(
            &coord,
            "implement the login flow",
            "coder",
            vec![TaskType::Implementation],
        )
        .await;

        // The agent goes silent past the heartbeat window; one cycle
        // disconnects it and returns its task to the queue.
        let later = Utc::now() + chrono::Duration::seconds(3600);
        coord.tick(later).await.unwrap();

        assert_eq!(
            coord.registry.snapshot(agent).unwrap().state,
            ConnectionState::Disconnected
        );
        let record = coord.store.get(task).unwrap();
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.retries, 1);

        // A replacement agent picks the task up on the next cycle.
        let relief = coord
            .register_agent("relief", vec![TaskType::Implementation])
            .await
            .unwrap();
        coord.tick(Utc::now()).await.unwrap();

        let record = coord.store.get(task).unwrap();
        assert_eq!(record.state, TaskState::Assigned);
        assert_eq!(record.assigned_agent, Some(relief));
    }

    #[tokio::test]
    async fn deadline_sweep_requeues_overdue_tasks() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;

        let (task, _agent) = assign_one(
            &coord,
            "implement the login flow",
            "coder",
            vec![TaskType::Implementation],
        )
        .await;

        let later = Utc::now() + chrono::Duration::seconds(3600);
        let expired = coord.expire_deadlines(later).await.unwrap();
        assert_eq!(expired, vec![task]);

        let record = coord.store.get(task).unwrap();
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.retries, 1);
    }

    #[tokio::test]
    async fn duplicate_completion_report_is_a_no_op() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;

        let (task, agent) = assign_one(
            &coord,
            "implement the login flow",
            "coder",
            vec![TaskType::Implementation],
        )
        .await;

        coord
            .handle_message(wire(MessageType::TaskClaimed, task, agent))
            .await
            .unwrap();
        let session = coord.workspaces.session(task).unwrap();
        commit_file(&session.path, "login.rs", "fn login() {}\n");

        let completion = wire(MessageType::TaskCompleted, task, agent);
        coord.handle_message(completion.clone()).await.unwrap();
        let baseline = git::rev_parse(temp.path(), "main").unwrap();

        // Replay of the same report changes nothing.
        coord.handle_message(completion).await.unwrap();
        assert_eq!(coord.store.get(task).unwrap().state, TaskState::Done);
        assert_eq!(git::rev_parse(temp.path(), "main").unwrap(), baseline);
    }

    #[tokio::test]
    async fn agent_ready_message_registers_the_agent() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;

        let announce = Message::new(MessageType::AgentReady, "coder").with_payload(json!({
            "name": "coder",
            "capabilities": ["implementation"],
        }));
        coord.handle_message(announce.clone()).await.unwrap();

        let status = coord.status();
        assert_eq!(status.connected_agents(), 1);
        assert_eq!(status.agents[0].name, "coder");
        assert_eq!(status.agents[0].capabilities, vec![TaskType::Implementation]);

        // Re-announcement is absorbed.
        coord.handle_message(announce).await.unwrap();
        assert_eq!(coord.status().connected_agents(), 1);
    }

    #[tokio::test]
    async fn malformed_messages_are_dropped() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;

        let msg = Message::new(MessageType::TaskCompleted, "agent")
            .with_payload(json!({"task": "not-a-task"}));
        coord.handle_message(msg).await.unwrap();
    }

    #[tokio::test]
    async fn lifecycle_is_recorded_in_the_event_log() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;

        let (task, agent) = assign_one(
            &coord,
            "implement the login flow",
            "coder",
            vec![TaskType::Implementation],
        )
        .await;
        coord
            .handle_message(wire(MessageType::TaskClaimed, task, agent))
            .await
            .unwrap();
        let session = coord.workspaces.session(task).unwrap();
        commit_file(&session.path, "login.rs", "fn login() {}\n");
        coord
            .handle_message(wire(MessageType::TaskCompleted, task, agent))
            .await
            .unwrap();

        let actions: Vec<EventAction> = coord
            .events
            .read_all()
            .unwrap()
            .iter()
            .map(|e| e.action)
            .collect();

        for expected in [
            EventAction::AgentRegistered,
            EventAction::TaskSubmitted,
            EventAction::TaskAssigned,
            EventAction::WorkspaceProvisioned,
            EventAction::TaskStarted,
            EventAction::TaskIntegrating,
            EventAction::MergeClean,
            EventAction::TaskDone,
        ] {
            assert!(actions.contains(&expected), "missing {:?}", expected);
        }
    }

    #[tokio::test]
    async fn status_reflects_current_state() {
        let temp = create_test_repo();
        let coord = coordinator(&temp).await;

        assign_one(
            &coord,
            "implement the login flow",
            "coder",
            vec![TaskType::Implementation],
        )
        .await;
        coord.submit_task("document the login flow", vec![]).await.unwrap();

        let status = coord.status();
        assert_eq!(status.connected_agents(), 1);
        assert_eq!(status.count(TaskState::Assigned), 1);
        assert_eq!(status.count(TaskState::Pending), 1);
    }
}

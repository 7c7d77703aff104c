//! Command dispatch and implementations for the foreman CLI.
//!
//! Each command resolves the repository context, builds what it needs, and
//! prints to stdout. The engine itself lives in `coordinator`; commands are
//! a thin surface over it.

use crate::cli::{Cli, Command, TaskArgs, WorkflowArgs};
use crate::context::CoordContext;
use crate::coordinator::Coordinator;
use crate::coordinator::recovery::{DurableStatus, ReplayedTaskState};
use crate::error::{ForemanError, Result};
use crate::events::EventLog;
use crate::store::TaskId;

/// Dispatch a parsed CLI invocation.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Status => cmd_status(),
        Command::Task(args) => cmd_task(args).await,
        Command::Workflow(args) => cmd_workflow(args).await,
    }
}

/// `foreman status`: rebuild a durable view from the event log.
fn cmd_status() -> Result<()> {
    let ctx = CoordContext::resolve()?;
    let log = EventLog::new(ctx.events_file());

    let status = DurableStatus::from_log(&log)?;
    if status.events_replayed == 0 {
        println!("No coordinator state recorded in this repository yet.");
        println!("Submit a task with: foreman task <description>");
        return Ok(());
    }

    println!("Events replayed: {}", status.events_replayed);
    println!(
        "Agents registered: {}{}",
        status.agents.len(),
        if status.agents.is_empty() {
            String::new()
        } else {
            format!(" ({})", status.agents.join(", "))
        }
    );
    println!(
        "Tasks: {} total, {} in flight, {} done, {} failed",
        status.tasks.len(),
        status.in_flight(),
        status.count(ReplayedTaskState::Done),
        status.count(ReplayedTaskState::Failed),
    );

    for (task, state) in &status.tasks {
        println!("  {}  {}", task, state.as_str());
    }
    Ok(())
}

/// `foreman task <description>`: submit one task and attempt assignment.
async fn cmd_task(args: TaskArgs) -> Result<()> {
    let ctx = CoordContext::resolve()?;
    let coord = Coordinator::open(ctx)?;

    let depends_on = parse_dependencies(&args.depends_on)?;
    let id = coord.submit_task(&args.description, depends_on).await?;
    let record = coord.task(id)?;

    println!("Submitted {}: {}", id, args.description);
    println!(
        "  tags: [{}]  size: {}",
        record
            .profile
            .tags
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        record.profile.size
    );

    report_assignments(&coord, coord.scoring_pass().await?);
    Ok(())
}

/// `foreman workflow <name> <description>`: submit a dependent task chain.
async fn cmd_workflow(args: WorkflowArgs) -> Result<()> {
    let stages = workflow_stages(&args.name)?;

    let ctx = CoordContext::resolve()?;
    let coord = Coordinator::open(ctx)?;

    println!("Workflow '{}': {} stages", args.name, stages.len());
    let mut previous: Option<TaskId> = None;
    for stage in stages {
        let description = format!("{} {}", stage, args.description);
        let depends_on = previous.into_iter().collect();
        let id = coord.submit_task(&description, depends_on).await?;
        println!("  {}  {}", id, description);
        previous = Some(id);
    }

    report_assignments(&coord, coord.scoring_pass().await?);
    Ok(())
}

/// Stage verbs per workflow template. The verbs double as analyzer
/// keywords, so each stage lands the matching type tag.
fn workflow_stages(name: &str) -> Result<&'static [&'static str]> {
    match name {
        "feature" => Ok(&["research", "implement", "test"]),
        "bugfix" => Ok(&["implement fix for", "test"]),
        "research" => Ok(&["research"]),
        other => Err(ForemanError::UserError(format!(
            "unknown workflow '{}'. Available workflows: feature, bugfix, research",
            other
        ))),
    }
}

fn parse_dependencies(raw: &[String]) -> Result<Vec<TaskId>> {
    raw.iter()
        .map(|s| {
            s.parse::<TaskId>().map_err(|_| {
                ForemanError::UserError(format!(
                    "invalid task ID '{}' (expected TASK-NNN)",
                    s
                ))
            })
        })
        .collect()
}

fn report_assignments(coord: &Coordinator, assignments: Vec<(TaskId, crate::registry::AgentId)>) {
    if assignments.is_empty() {
        println!("No agents available; tasks stay pending.");
        return;
    }
    for (task, agent) in assignments {
        let name = coord
            .agent_name(agent)
            .unwrap_or_else(|_| agent.to_string());
        println!("Assigned {} to agent '{}'", task, name);
    }
}

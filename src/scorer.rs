//! Assignment scoring for foreman.
//!
//! Pure functions that rank candidate agents for a task. Scoring rewards
//! capability overlap, penalizes current workload, and gives a capped bonus
//! for past completions. Ties break on earliest registration, so the same
//! inputs always select the same agent.

use crate::analyzer::TaskType;
use crate::registry::{AgentId, AgentSnapshot};

/// Points per capability tag matching the task.
const MATCH_WEIGHT: i64 = 10;

/// Penalty per currently assigned task.
const WORKLOAD_PENALTY: i64 = 2;

/// Cap on the completion-history bonus.
const COMPLETED_BONUS_CAP: i64 = 5;

/// Score an agent against a task's type tags.
pub fn score(agent: &AgentSnapshot, tags: &[TaskType]) -> i64 {
    let matches = agent
        .capabilities
        .iter()
        .filter(|cap| tags.contains(cap))
        .count() as i64;

    MATCH_WEIGHT * matches - WORKLOAD_PENALTY * i64::from(agent.workload)
        + i64::from(agent.completed).min(COMPLETED_BONUS_CAP)
}

/// Select the best agent for a task.
///
/// Disconnected agents are filtered here (the registry hands over everything),
/// and specialists are candidates only when they match at least one tag. When
/// no specialist matches, the unspecialized pool is ranked instead (workload
/// and history still apply). Returns `None` when neither pool yields a
/// candidate.
///
/// Both pools must be in registration order; the earliest-registered agent
/// wins score ties.
pub fn select(
    tags: &[TaskType],
    specialists: &[AgentSnapshot],
    fallback: &[AgentSnapshot],
) -> Option<AgentId> {
    let from_specialists = best_of(
        specialists.iter().filter(|agent| {
            agent.state.is_available()
                && agent.capabilities.iter().any(|cap| tags.contains(cap))
        }),
        tags,
    );

    from_specialists.or_else(|| {
        best_of(fallback.iter().filter(|agent| agent.state.is_available()), tags)
    })
}

fn best_of<'a, I: Iterator<Item = &'a AgentSnapshot>>(
    pool: I,
    tags: &[TaskType],
) -> Option<AgentId> {
    // Strict comparison keeps the earliest pool entry on ties.
    let mut best: Option<(i64, AgentId)> = None;
    for agent in pool {
        let agent_score = score(agent, tags);
        match best {
            Some((best_score, _)) if agent_score <= best_score => {}
            _ => best = Some((agent_score, agent.id)),
        }
    }
    best.map(|(_, id)| id)
}

//! foreman: multi-agent task coordination over git worktrees.
//!
//! The engine accepts task descriptions, classifies them, assigns them to
//! registered agents by capability score, isolates each assignment in its
//! own git branch and worktree, and serializes integration back into a
//! shared baseline branch. Every state transition is appended to an NDJSON
//! event log and mirrored on an in-process message bus.

pub mod analyzer;
pub mod bus;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod git;
pub mod merge;
pub mod registry;
pub mod scorer;
pub mod store;
pub mod workspace;

#[cfg(test)]
mod test_support;

//! Command-line interface definition for foreman.
//!
//! Defines the argument structure using clap's derive API. Dispatch lives
//! in the `commands` module.

use clap::{Parser, Subcommand};

/// Multi-agent task coordination over git worktrees.
#[derive(Parser, Debug)]
#[command(name = "foreman")]
#[command(version)]
#[command(about = "Coordinate agent task assignment, isolation, and integration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show coordinator status recovered from the event log
    Status,

    /// Submit a task and run one assignment pass
    Task(TaskArgs),

    /// Submit a predefined chain of tasks
    Workflow(WorkflowArgs),
}

#[derive(clap::Args, Debug)]
pub struct TaskArgs {
    /// Task description (drives type tags and size classification)
    pub description: String,

    /// Task IDs this task depends on (e.g. TASK-001)
    #[arg(long = "depends-on", value_name = "TASK_ID")]
    pub depends_on: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct WorkflowArgs {
    /// Workflow template: feature, bugfix, or research
    pub name: String,

    /// Description shared by the generated tasks
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn parses_status() {
        let cli = parse(&["foreman", "status"]);
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn parses_task_with_description() {
        let cli = parse(&["foreman", "task", "implement the login flow"]);
        match cli.command {
            Command::Task(args) => {
                assert_eq!(args.description, "implement the login flow");
                assert!(args.depends_on.is_empty());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn parses_repeated_depends_on() {
        let cli = parse(&[
            "foreman",
            "task",
            "test the login flow",
            "--depends-on",
            "TASK-001",
            "--depends-on",
            "TASK-002",
        ]);
        match cli.command {
            Command::Task(args) => {
                assert_eq!(args.depends_on, vec!["TASK-001", "TASK-002"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn parses_workflow() {
        let cli = parse(&["foreman", "workflow", "feature", "login flow"]);
        match cli.command {
            Command::Workflow(args) => {
                assert_eq!(args.name, "feature");
                assert_eq!(args.description, "login flow");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn task_requires_description() {
        assert!(Cli::try_parse_from(["foreman", "task"]).is_err());
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["foreman", "frobnicate"]).is_err());
    }
}

//! Configuration model for foreman.
//!
//! Defines the Config struct that represents `.foreman/config.yaml`.
//! Supports forward-compatible YAML parsing (unknown fields are ignored),
//! sensible defaults for optional fields, and validation of config values.

use crate::context::CoordContext;
use crate::error::{ForemanError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the coordinator.
///
/// All fields have defaults so a missing config file is equivalent to an
/// empty one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the shared baseline branch workspaces are merged into.
    pub baseline_branch: String,

    /// Seconds between expected agent heartbeats.
    pub heartbeat_interval_secs: u64,

    /// Number of consecutive missed heartbeat intervals before an agent
    /// is marked disconnected.
    pub heartbeat_misses: u32,

    /// Retry ceiling: a task returned to pending more than this many times
    /// moves to failed.
    pub retry_limit: u32,

    /// Seconds an assigned/in-progress task may run before forced
    /// cancellation.
    pub task_deadline_secs: u64,

    /// Bounded buffer size for each message bus subscriber.
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baseline_branch: "main".to_string(),
            heartbeat_interval_secs: 30,
            heartbeat_misses: 2,
            retry_limit: 3,
            task_deadline_secs: 1800,
            channel_capacity: 256,
        }
    }
}

impl Config {
    /// Load the config from `.foreman/config.yaml`, falling back to defaults
    /// when the file does not exist.
    pub fn load(ctx: &CoordContext) -> Result<Self> {
        let path = ctx.config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            ForemanError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ForemanError::UserError(format!(
                "failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Write the config to `.foreman/config.yaml`.
    pub fn save(&self, ctx: &CoordContext) -> Result<()> {
        let path = ctx.config_path();
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| ForemanError::UserError(format!("failed to serialize config: {}", e)))?;

        std::fs::write(&path, yaml).map_err(|e| {
            ForemanError::UserError(format!(
                "failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Validate config values.
    pub fn validate(&self) -> Result<()> {
        if self.baseline_branch.is_empty() {
            return Err(ForemanError::UserError(
                "config: baseline_branch must not be empty".to_string(),
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ForemanError::UserError(
                "config: heartbeat_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_misses == 0 {
            return Err(ForemanError::UserError(
                "config: heartbeat_misses must be greater than zero".to_string(),
            ));
        }
        if self.task_deadline_secs == 0 {
            return Err(ForemanError::UserError(
                "config: task_deadline_secs must be greater than zero".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ForemanError::UserError(
                "config: channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The window after which a silent agent is considered disconnected.
    pub fn heartbeat_window(&self) -> chrono::Duration {
        chrono::Duration::seconds((self.heartbeat_interval_secs * self.heartbeat_misses as u64) as i64)
    }

    /// Deadline granted to each assignment.
    pub fn task_deadline(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.task_deadline_secs as i64)
    }
}

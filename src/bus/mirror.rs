//! Human-readable mirror of bus traffic.
//!
//! Appends one markdown block per published message to
//! `.foreman/messages.md`. The mirror is export-only: nothing ever reads it
//! back, so its format can evolve without a migration.

use crate::bus::message::Message;
use crate::error::{ForemanError, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Append-only markdown writer for the message mirror.
#[derive(Debug, Clone)]
pub struct MirrorWriter {
    path: PathBuf,
}

impl MirrorWriter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one message block.
    pub fn append(&self, channel: &str, message: &Message) -> Result<()> {
        let body = serde_json::to_string_pretty(&message.payload)
            .unwrap_or_else(|_| message.payload.to_string());

        let target = message.target.as_deref().unwrap_or("-");
        let block = format!(
            "## {} `{}`\n\n- channel: `{}`\n- from: `{}`\n- to: `{}`\n- id: `{}`\n\n```json\n{}\n```\n\n",
            message.ts.to_rfc3339(),
            message.kind,
            channel,
            message.sender,
            target,
            message.id,
            body
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                ForemanError::UserError(format!(
                    "failed to open message mirror '{}': {}",
                    self.path.display(),
                    e
                ))
            })?;

        file.write_all(block.as_bytes()).map_err(|e| {
            ForemanError::UserError(format!(
                "failed to write message mirror '{}': {}",
                self.path.display(),
                e
            ))
        })
    }
}

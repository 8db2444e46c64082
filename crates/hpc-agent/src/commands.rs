//! Commands the daemon may attach to a heartbeat response. Unknown types
//! are logged and ignored; deadline-expired commands are discarded before
//! ever reaching a handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Drain,
    Resume,
    Shutdown,
    UpdateAgent,
    RunDiagnostic,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCommand {
    pub command_id: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub deadline: DateTime<Utc>,
}

/// Outcome of processing one command, surfaced so the caller can act on
/// lifecycle-affecting ones (`Shutdown`, `Drain`, `Resume`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEffect {
    Drain,
    Resume,
    Shutdown,
    UpdateAgent,
    RunDiagnostic,
    Ignored,
}

/// Filters out expired commands and maps the rest to an effect. Never
/// panics on an unrecognized command type — it's logged and ignored.
pub fn process_commands(commands: &[AgentCommand], now: DateTime<Utc>) -> Vec<CommandEffect> {
    commands
        .iter()
        .filter_map(|cmd| {
            if cmd.deadline < now {
                info!(command_id = %cmd.command_id, "discarding command past its deadline");
                return None;
            }
            Some(match cmd.command_type {
                CommandType::Drain => CommandEffect::Drain,
                CommandType::Resume => CommandEffect::Resume,
                CommandType::Shutdown => CommandEffect::Shutdown,
                CommandType::UpdateAgent => CommandEffect::UpdateAgent,
                CommandType::RunDiagnostic => CommandEffect::RunDiagnostic,
                CommandType::Unknown => {
                    warn!(command_id = %cmd.command_id, "unknown command type, ignoring");
                    CommandEffect::Ignored
                }
            })
        })
        .collect()
}

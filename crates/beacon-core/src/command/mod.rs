// ── Command ingestion ──
//
// Validation and filtering of command records arriving over realtime.
// A record is offered once; anything rejected here is dropped for good,
// there is no retry path.

mod engine;

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::router::{DropReason, RouteOutcome};

pub use engine::{QueuedCommandEngine, RECENT_COMMAND_CAPACITY, RecentCommands};

/// Shortest command id accepted after trimming.
pub const MIN_COMMAND_ID_LEN: usize = 8;

// ── Types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    Acked,
    Failed,
    Expired,
    /// Unrecognised status, kept verbatim.
    Other(String),
}

impl CommandStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "pending" => Self::Pending,
            "acked" => Self::Acked,
            "failed" => Self::Failed,
            "expired" => Self::Expired,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Acked => "acked",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CommandStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A validated command ready for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    pub id: String,
    #[serde(rename = "command")]
    pub name: String,
    pub created_at: Option<String>,
    /// Canonical JSON text; `{}` when the record had none.
    pub payload: String,
    pub status: CommandStatus,
    pub device_uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandRejection {
    #[error("command record is not a JSON object")]
    NotAnObject,

    #[error("command id `{id}` is shorter than {min} characters", min = MIN_COMMAND_ID_LEN)]
    InvalidId { id: String },

    #[error("command `{id}` has no name")]
    MissingName { id: String },
}

/// Executes accepted commands and remembers what it has seen.
pub trait CommandEngine {
    fn was_recently_processed(&self, id: &str) -> bool;
    fn execute(&mut self, command: Command);
}

// ── Building ─────────────────────────────────────────────────────────

pub fn build_command(record: &Value) -> Result<Command, CommandRejection> {
    if !record.is_object() {
        return Err(CommandRejection::NotAnObject);
    }

    let id = str_field(record, "id").trim();
    if id.chars().count() < MIN_COMMAND_ID_LEN {
        return Err(CommandRejection::InvalidId { id: id.to_owned() });
    }

    let name = str_field(record, "command").trim();
    if name.is_empty() {
        return Err(CommandRejection::MissingName { id: id.to_owned() });
    }

    Ok(Command {
        id: id.to_owned(),
        name: name.to_owned(),
        created_at: opt_field(record, "created_at"),
        payload: canonical_payload(record.get("payload")),
        status: CommandStatus::parse(str_field(record, "status")),
        device_uuid: opt_field(record, "device_uuid"),
    })
}

/// Serialize a payload as compact JSON with sorted keys.
///
/// A string payload that itself holds a JSON object is unwrapped first.
fn canonical_payload(payload: Option<&Value>) -> String {
    match payload {
        None | Some(Value::Null) => "{}".to_owned(),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(inner @ Value::Object(_)) => inner.to_string(),
            _ => Value::String(raw.clone()).to_string(),
        },
        Some(other) => other.to_string(),
    }
}

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

pub(crate) fn opt_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

// ── Ingestion ────────────────────────────────────────────────────────

/// Validate, filter, dedup, and hand a command record to the engine.
///
/// `device_filter` is the device a broadcast was addressed to; `None`
/// for row-change deliveries that are already scoped server-side.
pub fn ingest(
    record: &Value,
    device_filter: Option<&str>,
    local_device: Option<&str>,
    engine: &mut dyn CommandEngine,
) -> RouteOutcome {
    let command = match build_command(record) {
        Ok(command) => command,
        Err(rejection) => {
            tracing::debug!(reason = %rejection, "Dropping invalid command");
            return RouteOutcome::Dropped(DropReason::InvalidCommand);
        }
    };

    if let Some(target) = device_filter {
        if local_device != Some(target) {
            tracing::debug!(
                command_id = %command.id,
                addressed_to = target,
                "Command addressed to another device"
            );
            return RouteOutcome::Dropped(DropReason::OtherDevice);
        }
    }

    if engine.was_recently_processed(&command.id) {
        tracing::debug!(command_id = %command.id, "Duplicate command, already processed");
        return RouteOutcome::Dropped(DropReason::Duplicate);
    }

    if command.status != CommandStatus::Pending {
        tracing::debug!(
            command_id = %command.id,
            status = %command.status,
            "Skipping non-pending command"
        );
        return RouteOutcome::Dropped(DropReason::NotPending);
    }

    tracing::info!(
        command_id = %command.id,
        command = %command.name,
        "Executing realtime command"
    );
    engine.execute(command);
    RouteOutcome::CommandAccepted
}

// ── Tests ────────────────────────────────────────────────────────────

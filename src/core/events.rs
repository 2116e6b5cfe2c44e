//! Domain events: a closed tagged union, one strongly-typed payload per type.
//!
//! Events are stored as `(event_type, payload)` column pairs. The pair is the
//! adjacently-tagged serde form of [`EventKind`], so decoding a row is a plain
//! `serde_json::from_value` with exhaustiveness enforced by the enum.

use crate::core::error::HivelogError;
use crate::core::models::{Importance, SwarmBeadContext};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A stored event: the kind plus everything assigned at append time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub sequence: i64,
    pub id: String,
    pub project_key: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    AgentRegistered(AgentRegistered),
    AgentActive(AgentActive),
    MessageSent(MessageSent),
    MessageRead(MessageReceipt),
    MessageAcked(MessageReceipt),
    FileReserved(FileReserved),
    FileReleased(FileReleased),
    FileRenewed(FileRenewed),
    TaskStarted(TaskStarted),
    TaskProgress(TaskProgress),
    TaskCompleted(TaskCompleted),
    TaskBlocked(TaskBlocked),
    CheckpointCreated(CheckpointCreated),
    CheckpointRecovered(CheckpointRecovered),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRegistered {
    pub agent_name: String,
    pub program: String,
    pub model: String,
    #[serde(default)]
    pub task_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentActive {
    pub agent_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSent {
    pub message_id: String,
    pub from_agent: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default)]
    pub ack_required: bool,
}

/// Payload shared by `message_read` and `message_acked`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub message_id: String,
    pub agent_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservedPath {
    pub reservation_id: String,
    pub path_pattern: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReserved {
    pub agent_name: String,
    pub paths: Vec<ReservedPath>,
    pub exclusive: bool,
    #[serde(default)]
    pub reason: Option<String>,
    pub expires_at: i64,
}

/// Release selector precedence: ids, then paths, then everything the agent holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReleased {
    pub agent_name: String,
    #[serde(default)]
    pub reservation_ids: Option<Vec<String>>,
    #[serde(default)]
    pub paths: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewedReservation {
    pub reservation_id: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRenewed {
    pub agent_name: String,
    pub renewals: Vec<RenewedReservation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStarted {
    pub agent_name: String,
    pub bead_id: String,
    #[serde(default)]
    pub epic_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub agent_name: String,
    pub bead_id: String,
    pub progress_percent: u8,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompleted {
    pub agent_name: String,
    pub bead_id: String,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBlocked {
    pub agent_name: String,
    pub bead_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointCreated {
    pub context: SwarmBeadContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecovered {
    pub epic_id: String,
    pub bead_id: String,
    pub agent_name: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

pub const EVENT_TYPES: &[&str] = &[
    "agent_registered",
    "agent_active",
    "message_sent",
    "message_read",
    "message_acked",
    "file_reserved",
    "file_released",
    "file_renewed",
    "task_started",
    "task_progress",
    "task_completed",
    "task_blocked",
    "checkpoint_created",
    "checkpoint_recovered",
];

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::AgentRegistered(_) => "agent_registered",
            EventKind::AgentActive(_) => "agent_active",
            EventKind::MessageSent(_) => "message_sent",
            EventKind::MessageRead(_) => "message_read",
            EventKind::MessageAcked(_) => "message_acked",
            EventKind::FileReserved(_) => "file_reserved",
            EventKind::FileReleased(_) => "file_released",
            EventKind::FileRenewed(_) => "file_renewed",
            EventKind::TaskStarted(_) => "task_started",
            EventKind::TaskProgress(_) => "task_progress",
            EventKind::TaskCompleted(_) => "task_completed",
            EventKind::TaskBlocked(_) => "task_blocked",
            EventKind::CheckpointCreated(_) => "checkpoint_created",
            EventKind::CheckpointRecovered(_) => "checkpoint_recovered",
        }
    }

    /// The agent on whose behalf the event was appended.
    pub fn actor(&self) -> &str {
        match self {
            EventKind::AgentRegistered(p) => &p.agent_name,
            EventKind::AgentActive(p) => &p.agent_name,
            EventKind::MessageSent(p) => &p.from_agent,
            EventKind::MessageRead(p) | EventKind::MessageAcked(p) => &p.agent_name,
            EventKind::FileReserved(p) => &p.agent_name,
            EventKind::FileReleased(p) => &p.agent_name,
            EventKind::FileRenewed(p) => &p.agent_name,
            EventKind::TaskStarted(p) => &p.agent_name,
            EventKind::TaskProgress(p) => &p.agent_name,
            EventKind::TaskCompleted(p) => &p.agent_name,
            EventKind::TaskBlocked(p) => &p.agent_name,
            EventKind::CheckpointCreated(p) => &p.context.agent_name,
            EventKind::CheckpointRecovered(p) => &p.agent_name,
        }
    }

    /// Split into the `(event_type, payload)` columns.
    pub fn to_columns(&self) -> Result<(&'static str, String), HivelogError> {
        let mut tagged = serde_json::to_value(self)?;
        let payload = tagged
            .get_mut("payload")
            .map(JsonValue::take)
            .unwrap_or(JsonValue::Null);
        Ok((self.event_type(), serde_json::to_string(&payload)?))
    }

    /// Rebuild from the `(event_type, payload)` columns.
    pub fn from_columns(event_type: &str, payload: &str) -> Result<Self, HivelogError> {
        let payload: JsonValue = serde_json::from_str(payload)?;
        let tagged = serde_json::json!({ "type": event_type, "payload": payload });
        serde_json::from_value(tagged).map_err(|e| {
            HivelogError::ValidationError(format!("Invalid '{}' event: {}", event_type, e))
        })
    }
}

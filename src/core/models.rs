//! Projection row types shared by the kernel and its subsystems.

use crate::core::error::HivelogError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Agent registry row keyed by `(project_key, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub project_key: String,
    pub name: String,
    pub program: String,
    pub model: String,
    pub task_description: Option<String>,
    pub registered_at: i64,
    pub last_active_at: i64,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Low => "low",
            Importance::Normal => "normal",
            Importance::High => "high",
            Importance::Urgent => "urgent",
        }
    }
}

impl FromStr for Importance {
    type Err = HivelogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Importance::Low),
            "normal" => Ok(Importance::Normal),
            "high" => Ok(Importance::High),
            "urgent" => Ok(Importance::Urgent),
            _ => Err(HivelogError::ValidationError(format!(
                "Invalid importance: {}. Must be one of: low, normal, high, urgent",
                s
            ))),
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable message row. Per-recipient state lives in [`RecipientRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub project_key: String,
    pub from_agent: String,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
    pub importance: Importance,
    pub ack_required: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRecord {
    pub message_id: String,
    pub agent_name: String,
    pub read_at: Option<i64>,
    pub acked_at: Option<i64>,
}

/// One inbox row: the recipient's own state joined to the message.
/// `body` is `None` unless bodies were requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxEntry {
    pub message_id: String,
    pub from_agent: String,
    pub subject: String,
    pub body: Option<String>,
    pub thread_id: Option<String>,
    pub importance: Importance,
    pub ack_required: bool,
    pub created_at: i64,
    pub read_at: Option<i64>,
    pub acked_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub project_key: String,
    pub agent_name: String,
    pub path_pattern: String,
    pub exclusive: bool,
    pub reason: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub released_at: Option<i64>,
}

impl Reservation {
    pub fn is_active(&self, now: i64) -> bool {
        self.released_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    None,
    Pending,
    Recovered,
    Failed,
}

impl RecoveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryState::None => "none",
            RecoveryState::Pending => "pending",
            RecoveryState::Recovered => "recovered",
            RecoveryState::Failed => "failed",
        }
    }
}

impl FromStr for RecoveryState {
    type Err = HivelogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(RecoveryState::None),
            "pending" => Ok(RecoveryState::Pending),
            "recovered" => Ok(RecoveryState::Recovered),
            "failed" => Ok(RecoveryState::Failed),
            _ => Err(HivelogError::ValidationError(format!(
                "Invalid recovery_state: {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    Started,
    Quarter,
    Half,
    ThreeQuarters,
    Complete,
}

impl Milestone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Milestone::Started => "started",
            Milestone::Quarter => "quarter",
            Milestone::Half => "half",
            Milestone::ThreeQuarters => "three_quarters",
            Milestone::Complete => "complete",
        }
    }
}

impl FromStr for Milestone {
    type Err = HivelogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Milestone::Started),
            "quarter" => Ok(Milestone::Quarter),
            "half" => Ok(Milestone::Half),
            "three_quarters" => Ok(Milestone::ThreeQuarters),
            "complete" => Ok(Milestone::Complete),
            _ => Err(HivelogError::ValidationError(format!(
                "Invalid milestone: {}",
                s
            ))),
        }
    }
}

/// Checkpointed progress of one agent on one bead (unit of work) of an epic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwarmBeadContext {
    pub project_key: String,
    pub epic_id: String,
    pub bead_id: String,
    pub agent_name: String,
    pub files: Vec<String>,
    pub strategy: String,
    pub directives: Vec<String>,
    pub progress_percent: u8,
    pub last_milestone: Milestone,
    pub recovery_state: RecoveryState,
    pub checkpointed_at: i64,
}

//! Shared client-side types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use navalha_core::{DeviceId, Money, SessionId};

use navalha_caixa::{Expense, Movement};

/// A mutating command as shipped to the durable store.
///
/// The embedded ids are client-generated, so every command carries its own
/// idempotency key and a retried flush cannot double-apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum CaixaCommand {
    Open {
        session_id: SessionId,
        opening_balance: Money,
        notes: Option<String>,
        opened_at: DateTime<Utc>,
    },
    Close {
        session_id: SessionId,
        counted_balance: Money,
        notes: Option<String>,
        closed_at: DateTime<Utc>,
    },
    RecordMovement {
        movement: Movement,
    },
    RecordExpense {
        expense: Expense,
    },
}

impl CaixaCommand {
    /// The id that makes a replay of this command a no-op.
    pub fn idempotency_key(&self) -> Uuid {
        match self {
            CaixaCommand::Open { session_id, .. } => (*session_id).into(),
            CaixaCommand::Close { session_id, .. } => {
                // A session closes once; derive a distinct but stable key
                // from the session id so open and close never collide.
                Uuid::new_v5(&Uuid::NAMESPACE_OID, session_id.as_uuid().as_bytes())
            }
            CaixaCommand::RecordMovement { movement } => movement.id.into(),
            CaixaCommand::RecordExpense { expense } => expense.id.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CaixaCommand::Open { .. } => "open",
            CaixaCommand::Close { .. } => "close",
            CaixaCommand::RecordMovement { .. } => "record_movement",
            CaixaCommand::RecordExpense { .. } => "record_expense",
        }
    }
}

/// Status of a queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    /// Waiting for a flush.
    Pending,
    /// Picked up by an in-flight flush.
    Syncing,
    /// Durably applied on the remote store.
    Synced,
    /// Deterministically rejected by the remote store; needs a
    /// compensating entry, never a retry.
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Syncing => "syncing",
            CommandStatus::Synced => "synced",
            CommandStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CommandStatus::Pending),
            "syncing" => Some(CommandStatus::Syncing),
            "synced" => Some(CommandStatus::Synced),
            "failed" => Some(CommandStatus::Failed),
            _ => None,
        }
    }
}

/// A command parked in the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedCommand {
    pub id: Uuid,
    pub device_id: DeviceId,
    pub kind: String,
    pub payload: JsonValue,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl QueuedCommand {
    /// Decode the stored payload back into a command.
    pub fn command(&self) -> Result<CaixaCommand, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Connectivity state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// Online and writing through to the durable store.
    Online,
    /// Offline; commands are parked in the local queue.
    Offline,
}

//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::Money;

/// Result type used across the ledger domain.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-level error.
///
/// Covers the deterministic business failures of the caixa engine plus the
/// two cross-process outcomes (`SyncConflict`, `Network`) that mutating
/// commands can surface. Transport retries/backoff live in the sync layer;
/// a `Network` error never fails a command there, it only degrades the
/// sync-status indicator.
/// Serializable so the remote transport can carry a typed rejection back to
/// the issuing device.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerError {
    /// A value failed validation (non-positive amount, missing reason, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The device/role pair lacks the capability for this action.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Session lifecycle violation: no open session where one is required,
    /// or a session already open on `open()`.
    #[error("session state: {0}")]
    SessionState(String),

    /// A sangria would drive cash-on-hand negative.
    #[error("insufficient funds: requested {requested}, cash on hand {available}")]
    InsufficientFunds { requested: Money, available: Money },

    /// A concurrent durable-store write won the race. The caller must
    /// refresh local state and retry; this is never auto-resolved.
    #[error("sync conflict: {0}")]
    SyncConflict(String),

    /// Transient transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// A requested record does not exist.
    #[error("not found")]
    NotFound,
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn session_state(msg: impl Into<String>) -> Self {
        Self::SessionState(msg.into())
    }

    pub fn insufficient_funds(requested: Money, available: Money) -> Self {
        Self::InsufficientFunds {
            requested,
            available,
        }
    }

    pub fn sync_conflict(msg: impl Into<String>) -> Self {
        Self::SyncConflict(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use navalha_caixa::Expense;
use navalha_core::{ExpectedVersion, SessionId};

/// An event ready to be appended to a session stream (no sequence number
/// assigned yet).
///
/// Built from a typed domain event via [`UncommittedEvent::from_typed`]; the
/// payload is stored as JSON alongside the event metadata needed to
/// deserialize it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub session_id: SessionId,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Wrap a typed domain event for persistence.
    pub fn from_typed<E>(
        session_id: SessionId,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, StoreError>
    where
        E: navalha_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            StoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            session_id,
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

/// A persisted event with its assigned position in the session stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub session_id: SessionId,

    /// Monotonically increasing position in the session stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert into an envelope for publication on the event bus.
    pub fn to_envelope(&self) -> navalha_events::EventEnvelope<JsonValue> {
        navalha_events::EventEnvelope::new(
            self.event_id,
            self.session_id,
            self.event_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Session store operation error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed (stale stream version).
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// The single-open-session slot is taken.
    #[error("a session is already open: {0}")]
    OpenSessionExists(SessionId),

    /// Invalid event data or stream state.
    #[error("invalid append: {0}")]
    InvalidAppend(String),
}

/// Append-only store of session event streams.
///
/// Beyond the streams themselves, implementations own two invariants the
/// aggregate cannot enforce alone:
///
/// - **Single open session.** The open-session slot is maintained in the
///   same critical section as the append: an append containing a
///   `SessionOpened` event fails with [`StoreError::OpenSessionExists`]
///   while another session holds the slot, and an append containing
///   `SessionClosed` releases it. Concurrent `open()` attempts from two
///   terminals therefore race on the store, not on any client's memory, and
///   exactly one write succeeds.
/// - **Optimistic concurrency.** `append` checks `expected_version` against
///   the current stream version, so a decision made against stale state
///   (e.g. a sangria floor check) can never commit.
///
/// The store also keeps the loose-expense log: owner-paid despesas recorded
/// while no session is open, outside any stream.
pub trait SessionStore: Send + Sync {
    /// Append events to one session's stream (append-only).
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    /// Load the full stream for a session, in sequence order.
    fn load_stream(&self, session_id: SessionId) -> Result<Vec<StoredEvent>, StoreError>;

    /// The session currently holding the open slot, if any.
    fn current_open(&self) -> Result<Option<SessionId>, StoreError>;

    /// Record an owner-paid expense outside any session. Idempotent by
    /// expense id: re-submitting returns the already-stored record.
    fn append_loose_expense(&self, expense: Expense) -> Result<Expense, StoreError>;

    /// All loose expenses, in insertion order.
    fn loose_expenses(&self) -> Result<Vec<Expense>, StoreError>;
}

impl<S> SessionStore for Arc<S>
where
    S: SessionStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(&self, session_id: SessionId) -> Result<Vec<StoredEvent>, StoreError> {
        (**self).load_stream(session_id)
    }

    fn current_open(&self) -> Result<Option<SessionId>, StoreError> {
        (**self).current_open()
    }

    fn append_loose_expense(&self, expense: Expense) -> Result<Expense, StoreError> {
        (**self).append_loose_expense(expense)
    }

    fn loose_expenses(&self) -> Result<Vec<Expense>, StoreError> {
        (**self).loose_expenses()
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use navalha_caixa::{Expense, SessionEvent};
use navalha_core::{ExpectedVersion, ExpenseId, SessionId};

use super::r#trait::{SessionStore, StoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<SessionId, Vec<StoredEvent>>,
    open_slot: Option<SessionId>,
    loose_expenses: Vec<Expense>,
    loose_ids: HashSet<ExpenseId>,
}

/// In-memory append-only session store.
///
/// Intended for tests/dev and as the reference for durable backends. All
/// state lives under one lock so slot maintenance is atomic with the append.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    inner: RwLock<Inner>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

impl SessionStore for InMemorySessionStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        // All events must target the same session stream.
        let session_id = events[0].session_id;
        for (idx, e) in events.iter().enumerate() {
            if e.session_id != session_id {
                return Err(StoreError::InvalidAppend(format!(
                    "batch contains multiple session_ids (index {idx})"
                )));
            }
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| StoreError::InvalidAppend("lock poisoned".to_string()))?;

        let current = inner
            .streams
            .get(&session_id)
            .map_or(0, |s| Self::current_version(s));
        if !expected_version.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        // Open-slot maintenance in the same critical section as the append:
        // this is the durable uniqueness constraint behind "at most one open
        // session".
        let opens = events.iter().any(|e| e.event_type == SessionEvent::OPENED);
        let closes = events.iter().any(|e| e.event_type == SessionEvent::CLOSED);

        if opens {
            if let Some(open) = inner.open_slot {
                if open != session_id {
                    return Err(StoreError::OpenSessionExists(open));
                }
            }
            inner.open_slot = Some(session_id);
        }

        // Assign sequence numbers and append (append-only).
        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        let stream = inner.streams.entry(session_id).or_default();
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                session_id: e.session_id,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }

        if closes && inner.open_slot == Some(session_id) {
            inner.open_slot = None;
        }

        Ok(committed)
    }

    fn load_stream(&self, session_id: SessionId) -> Result<Vec<StoredEvent>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(inner.streams.get(&session_id).cloned().unwrap_or_default())
    }

    fn current_open(&self) -> Result<Option<SessionId>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(inner.open_slot)
    }

    fn append_loose_expense(&self, expense: Expense) -> Result<Expense, StoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StoreError::InvalidAppend("lock poisoned".to_string()))?;

        if inner.loose_ids.contains(&expense.id) {
            let existing = inner
                .loose_expenses
                .iter()
                .find(|e| e.id == expense.id)
                .cloned();
            if let Some(existing) = existing {
                return Ok(existing);
            }
        }

        inner.loose_ids.insert(expense.id);
        inner.loose_expenses.push(expense.clone());
        Ok(expense)
    }

    fn loose_expenses(&self) -> Result<Vec<Expense>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(inner.loose_expenses.clone())
    }
}

//! Local projection of the current session.
//!
//! The cache is a *projection* of a durable record, never an authority: it
//! is rebuilt wholesale from a store snapshot by the single refresh path,
//! and mutated optimistically in between so the caller sees a command's
//! effect immediately. Two terminals can each believe what their cache says,
//! but only the store's open-session slot decides who actually opened.

use std::sync::RwLock;

use navalha_caixa::{Expense, Movement, MovementFilter, SessionSnapshot, SessionTotals};
use navalha_core::{LedgerError, LedgerResult, SessionId};

/// In-memory snapshot cache for the currently relevant session.
#[derive(Debug, Default)]
pub struct LocalCache {
    session: RwLock<Option<SessionSnapshot>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The single refresh path: replace the projection with what the
    /// durable store reports. Idempotent, so it does not matter which of
    /// the three triggers (notification, poll, manual) got here first.
    pub fn replace(&self, snapshot: Option<SessionSnapshot>) {
        if let Ok(mut guard) = self.session.write() {
            *guard = snapshot;
        }
    }

    pub fn current(&self) -> Option<SessionSnapshot> {
        self.session.read().ok().and_then(|guard| guard.clone())
    }

    /// Id of the locally-known open session.
    pub fn open_session_id(&self) -> Option<SessionId> {
        self.session
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().filter(|s| s.is_open()).map(|s| s.session_id))
    }

    pub fn totals(&self) -> Option<SessionTotals> {
        self.session
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.totals()))
    }

    pub fn movements(&self, filter: &MovementFilter) -> Vec<Movement> {
        self.session
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.movements_matching(filter)))
            .unwrap_or_default()
    }

    /// Optimistic apply: a freshly-issued open.
    pub fn apply_open(&self, snapshot: SessionSnapshot) {
        self.replace(Some(snapshot));
    }

    /// Optimistic apply: a freshly-issued movement.
    pub fn apply_movement(&self, movement: &Movement) -> LedgerResult<()> {
        let mut guard = self
            .session
            .write()
            .map_err(|_| LedgerError::session_state("cache lock poisoned"))?;

        let Some(session) = guard.as_mut().filter(|s| s.is_open()) else {
            return Err(LedgerError::session_state("no open session"));
        };
        if session.session_id != movement.session_id {
            return Err(LedgerError::validation(
                "movement targets a different session",
            ));
        }
        if session.movements.iter().any(|m| m.id == movement.id) {
            return Ok(());
        }

        session.movements.push(movement.clone());
        Ok(())
    }

    /// Optimistic apply: a freshly-issued session expense.
    pub fn apply_expense(&self, expense: &Expense) -> LedgerResult<()> {
        let mut guard = self
            .session
            .write()
            .map_err(|_| LedgerError::session_state("cache lock poisoned"))?;

        let Some(session) = guard.as_mut().filter(|s| s.is_open()) else {
            return Err(LedgerError::session_state("no open session"));
        };
        if expense.session_id != Some(session.session_id) {
            return Err(LedgerError::validation(
                "expense targets a different session",
            ));
        }
        if session.expenses.iter().any(|e| e.id == expense.id) {
            return Ok(());
        }

        session.expenses.push(expense.clone());
        Ok(())
    }

    /// Optimistic apply: the session was closed with `snapshot` as its final
    /// state.
    pub fn apply_close(&self, snapshot: SessionSnapshot) {
        self.replace(Some(snapshot));
    }
}

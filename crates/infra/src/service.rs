//! Command pipeline and query facade for the caixa engine.
//!
//! `CaixaService` is the durable-side entry point: every mutating operation
//! runs gate check → load → rehydrate → decide → append → publish. The
//! capability check happens here, at the durable-write point, so a spoofed
//! or compromised client cannot bypass it by skipping the UI.

use serde_json::Value as JsonValue;
use uuid::Uuid;

use navalha_access::{Capability, CapabilityPolicy, DeviceContext, authorize};
use navalha_caixa::{
    CashSession, CloseSession, Expense, Movement, MovementFilter, MovementKind, OpenSession,
    PaidBy, RecordExpense, RecordMovement, SessionCommand, SessionSnapshot, SessionTotals,
};
use navalha_core::{Aggregate, ExpectedVersion, LedgerError, LedgerResult, Money, SessionId};
use navalha_events::{EventBus, EventEnvelope};

use crate::session_store::{SessionStore, StoreError, StoredEvent, UncommittedEvent};

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => LedgerError::sync_conflict(msg),
            StoreError::OpenSessionExists(id) => {
                LedgerError::session_state(format!("a session is already open ({id})"))
            }
            StoreError::InvalidAppend(msg) => LedgerError::validation(msg),
        }
    }
}

/// Durable-side service: owns the store, the change-notification bus and the
/// capability policy.
#[derive(Debug)]
pub struct CaixaService<S, B> {
    store: S,
    bus: B,
    policy: CapabilityPolicy,
}

impl<S, B> CaixaService<S, B> {
    pub fn new(store: S, bus: B, policy: CapabilityPolicy) -> Self {
        Self { store, bus, policy }
    }
}

impl<S, B> CaixaService<S, B>
where
    S: SessionStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Open the daily session with a starting float.
    ///
    /// The "at most one open session" check runs against the durable store,
    /// not local memory; two terminals racing here are decided by the
    /// store's open slot and exactly one wins.
    pub fn open(
        &self,
        opening_balance: Money,
        notes: Option<String>,
        device: &DeviceContext,
    ) -> LedgerResult<SessionSnapshot> {
        self.open_with_id(
            SessionId::new(),
            opening_balance,
            notes,
            chrono::Utc::now(),
            device,
        )
    }

    /// Open with a caller-supplied session id and timestamp.
    ///
    /// Offline-capable transports replay client-generated opens through
    /// here; a replay whose id was already applied returns the stored
    /// session instead of failing, keeping flush retries exactly-once.
    pub fn open_with_id(
        &self,
        session_id: SessionId,
        opening_balance: Money,
        notes: Option<String>,
        opened_at: chrono::DateTime<chrono::Utc>,
        device: &DeviceContext,
    ) -> LedgerResult<SessionSnapshot> {
        self.authorize(device, Capability::OpenSession)?;

        if let Some(snapshot) = self.session(session_id)? {
            return Ok(snapshot);
        }

        if let Some(open) = self.store.current_open()? {
            return Err(LedgerError::session_state(format!(
                "a session is already open ({open})"
            )));
        }

        let command = SessionCommand::Open(OpenSession {
            session_id,
            opening_balance,
            notes,
            opened_at,
        });

        let session = self.execute(session_id, command)?;
        tracing::info!(%session_id, opening_balance = %opening_balance, "cash session opened");

        self.snapshot_of(&session)
    }

    /// Close the open session against a counted drawer balance.
    ///
    /// The closed session and its reconciliation record are persisted in one
    /// atomic append; the returned snapshot carries the record.
    pub fn close(
        &self,
        counted_balance: Money,
        notes: Option<String>,
        device: &DeviceContext,
    ) -> LedgerResult<SessionSnapshot> {
        let Some(session_id) = self.store.current_open()? else {
            self.authorize(device, Capability::CloseSession)?;
            return Err(LedgerError::session_state("no open session"));
        };

        self.close_session(session_id, counted_balance, notes, chrono::Utc::now(), device)
    }

    /// Close a specific session.
    ///
    /// A session closes at most once, so a close command for an
    /// already-closed session is by definition a transport replay: it
    /// returns the stored snapshot instead of failing. A fresh close when
    /// nothing is open still surfaces `SessionState` through [`Self::close`].
    pub fn close_session(
        &self,
        session_id: SessionId,
        counted_balance: Money,
        notes: Option<String>,
        closed_at: chrono::DateTime<chrono::Utc>,
        device: &DeviceContext,
    ) -> LedgerResult<SessionSnapshot> {
        self.authorize(device, Capability::CloseSession)?;

        if let Some(snapshot) = self.session(session_id)? {
            if !snapshot.is_open() {
                return Ok(snapshot);
            }
        }

        let command = SessionCommand::Close(CloseSession {
            session_id,
            counted_balance,
            notes,
            closed_at,
        });

        let session = self.execute(session_id, command)?;
        if let Some(rec) = session.reconciliation() {
            tracing::info!(
                %session_id,
                expected = %rec.expected_cash,
                counted = %rec.counted_cash,
                variance = %rec.variance,
                outcome = ?rec.outcome,
                "cash session closed"
            );
        }

        self.snapshot_of(&session)
    }

    /// Append a movement to its session.
    ///
    /// Sangria/reforço are capability-gated; entrada/saída arrive from the
    /// order module on payment completion and are ungated by device class.
    /// Idempotent by `movement.id`: a retried append returns the stored
    /// record without duplicating it.
    pub fn record_movement(
        &self,
        movement: Movement,
        device: &DeviceContext,
    ) -> LedgerResult<Movement> {
        match movement.kind {
            MovementKind::Sangria => self.authorize(device, Capability::Sangria)?,
            MovementKind::Reforco => self.authorize(device, Capability::Reforco)?,
            MovementKind::Entrada | MovementKind::Saida => {}
        }

        let session_id = movement.session_id;
        let movement_id = movement.id;
        let command = SessionCommand::RecordMovement(RecordMovement { movement });

        let session = self.execute(session_id, command)?;
        tracing::debug!(%session_id, %movement_id, "movement recorded");

        session
            .find_movement(movement_id)
            .cloned()
            .ok_or_else(LedgerError::not_found)
    }

    /// Record a despesa.
    ///
    /// A drawer-paid expense requires the open session; an owner-paid
    /// expense without a session goes to the loose-expense log. Idempotent
    /// by `expense.id`.
    pub fn record_expense(
        &self,
        expense: Expense,
        device: &DeviceContext,
    ) -> LedgerResult<Expense> {
        self.authorize(device, Capability::Despesa)?;
        expense.validate()?;

        match expense.session_id {
            Some(session_id) => {
                let expense_id = expense.id;
                let command = SessionCommand::RecordExpense(RecordExpense { expense });

                let session = self.execute(session_id, command)?;
                tracing::debug!(%session_id, %expense_id, "expense recorded");

                session
                    .find_expense(expense_id)
                    .cloned()
                    .ok_or_else(LedgerError::not_found)
            }
            None => {
                if expense.paid_by == PaidBy::Caixa {
                    return Err(LedgerError::session_state(
                        "drawer-paid expense requires an open session",
                    ));
                }
                let stored = self.store.append_loose_expense(expense)?;
                tracing::debug!(expense_id = %stored.id, "loose expense recorded");
                Ok(stored)
            }
        }
    }

    /// The currently open session, rehydrated from the durable store.
    ///
    /// Idempotent and side-effect free; clients call this on startup to
    /// recover local state after a crash or restart.
    pub fn current_session(&self) -> LedgerResult<Option<SessionSnapshot>> {
        match self.store.current_open()? {
            Some(session_id) => self.session(session_id),
            None => Ok(None),
        }
    }

    /// A specific session's snapshot, open or closed.
    pub fn session(&self, session_id: SessionId) -> LedgerResult<Option<SessionSnapshot>> {
        let history = self.store.load_stream(session_id)?;
        if history.is_empty() {
            return Ok(None);
        }

        let session = rehydrate(session_id, &history)?;
        Ok(SessionSnapshot::from_session(&session))
    }

    /// Totals of the open session, if any.
    pub fn totals(&self) -> LedgerResult<Option<SessionTotals>> {
        Ok(self.current_session()?.map(|s| s.totals()))
    }

    /// Movements of the open session matching `filter`.
    pub fn movements(&self, filter: &MovementFilter) -> LedgerResult<Vec<Movement>> {
        Ok(self
            .current_session()?
            .map(|s| s.movements_matching(filter))
            .unwrap_or_default())
    }

    /// Owner-paid expenses recorded outside any session.
    pub fn loose_expenses(&self) -> LedgerResult<Vec<Expense>> {
        Ok(self.store.loose_expenses()?)
    }

    fn authorize(&self, device: &DeviceContext, capability: Capability) -> LedgerResult<()> {
        let caps = self.policy.capabilities_for(device.class, &device.role);
        authorize(&caps, capability).inspect_err(|_| {
            tracing::warn!(
                device_id = %device.device_id,
                device_class = ?device.class,
                role = %device.role,
                capability = capability.as_str(),
                "capability denied at durable-write point"
            );
        })
    }

    /// Run one command through the full pipeline and return the updated
    /// aggregate state.
    fn execute(
        &self,
        session_id: SessionId,
        command: SessionCommand,
    ) -> LedgerResult<CashSession> {
        // 1) Load history.
        let history = self.store.load_stream(session_id)?;
        validate_loaded_stream(session_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate.
        let mut session = rehydrate(session_id, &history)?;

        // 3) Decide (pure; no mutation).
        let decided = session.handle(&command)?;
        if decided.is_empty() {
            // Idempotent replay: the command was already applied.
            return Ok(session);
        }

        // 4) Persist (append-only, optimistic). The sangria floor and every
        // other decision above were made against exactly this version, so a
        // concurrent writer makes this append fail rather than commit a
        // stale decision.
        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(session_id, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        for ev in &decided {
            session.apply(ev);
        }

        // 5) Publish committed events. Publication is best-effort: the data
        // is already durable and the clients' interval poll covers a missed
        // notification.
        for stored in &committed {
            if let Err(e) = self.bus.publish(stored.to_envelope()) {
                tracing::warn!(%session_id, error = ?e, "change notification publish failed");
            }
        }

        Ok(session)
    }

    fn snapshot_of(&self, session: &CashSession) -> LedgerResult<SessionSnapshot> {
        SessionSnapshot::from_session(session).ok_or_else(LedgerError::not_found)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(session_id: SessionId, stream: &[StoredEvent]) -> LedgerResult<()> {
    // Ensure the backend returned the right stream, monotonically ordered.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.session_id != session_id {
            return Err(LedgerError::validation(format!(
                "loaded stream contains wrong session_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(LedgerError::validation(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn rehydrate(session_id: SessionId, history: &[StoredEvent]) -> LedgerResult<CashSession> {
    let mut session = CashSession::empty(session_id);
    for stored in history {
        let ev: navalha_caixa::SessionEvent = serde_json::from_value(stored.payload.clone())
            .map_err(|e| LedgerError::validation(format!("event deserialization failed: {e}")))?;
        session.apply(&ev);
    }
    Ok(session)
}

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use navalha_core::{
    Aggregate, AggregateRoot, ExpenseId, LedgerError, Money, MovementId, SessionId,
};
use navalha_events::Event;

use crate::movement::{Expense, Movement, MovementKind};
use crate::reconciliation::{ReconciliationRecord, reconcile};
use crate::totals::SessionTotals;

/// Session lifecycle: `Closed --open()--> Open --close()--> Closed`.
///
/// No other states; opening is atomic from the caller's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// Aggregate root: one working period of the cash drawer.
///
/// The aggregate holds the full ledger of its session (movements, expenses,
/// reconciliation) rebuilt by folding events; the durable store enforces the
/// cross-session "at most one open" invariant, not this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashSession {
    id: SessionId,
    status: SessionStatus,
    opened_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    opening_balance: Money,
    opening_notes: Option<String>,
    counted_balance: Option<Money>,
    closing_notes: Option<String>,
    movements: Vec<Movement>,
    expenses: Vec<Expense>,
    movement_ids: HashSet<MovementId>,
    expense_ids: HashSet<ExpenseId>,
    reconciliation: Option<ReconciliationRecord>,
    version: u64,
    created: bool,
}

impl CashSession {
    /// Empty aggregate for rehydration.
    pub fn empty(id: SessionId) -> Self {
        Self {
            id,
            status: SessionStatus::Open,
            opened_at: None,
            closed_at: None,
            opening_balance: Money::ZERO,
            opening_notes: None,
            counted_balance: None,
            closing_notes: None,
            movements: Vec::new(),
            expenses: Vec::new(),
            movement_ids: HashSet::new(),
            expense_ids: HashSet::new(),
            reconciliation: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.created && self.status == SessionStatus::Open
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn opening_balance(&self) -> Money {
        self.opening_balance
    }

    pub fn opening_notes(&self) -> Option<&str> {
        self.opening_notes.as_deref()
    }

    pub fn counted_balance(&self) -> Option<Money> {
        self.counted_balance
    }

    pub fn closing_notes(&self) -> Option<&str> {
        self.closing_notes.as_deref()
    }

    pub fn movements(&self) -> &[Movement] {
        &self.movements
    }

    pub fn expenses(&self) -> &[Expense] {
        &self.expenses
    }

    pub fn reconciliation(&self) -> Option<&ReconciliationRecord> {
        self.reconciliation.as_ref()
    }

    pub fn find_movement(&self, id: MovementId) -> Option<&Movement> {
        self.movements.iter().find(|m| m.id == id)
    }

    pub fn find_expense(&self, id: ExpenseId) -> Option<&Expense> {
        self.expenses.iter().find(|e| e.id == id)
    }

    /// Current totals, recomputed from the in-memory ledger.
    pub fn totals(&self) -> SessionTotals {
        SessionTotals::compute(self.opening_balance, &self.movements, &self.expenses)
    }
}

impl AggregateRoot for CashSession {
    type Id = SessionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: open the session with a starting float.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSession {
    pub session_id: SessionId,
    pub opening_balance: Money,
    pub notes: Option<String>,
    pub opened_at: DateTime<Utc>,
}

/// Command: append a movement to the open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub movement: Movement,
}

/// Command: append a session-bound expense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordExpense {
    pub expense: Expense,
}

/// Command: close the session against a counted drawer balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSession {
    pub session_id: SessionId,
    pub counted_balance: Money,
    pub notes: Option<String>,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionCommand {
    Open(OpenSession),
    RecordMovement(RecordMovement),
    RecordExpense(RecordExpense),
    Close(CloseSession),
}

/// Event: SessionOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOpened {
    pub session_id: SessionId,
    pub opening_balance: Money,
    pub notes: Option<String>,
    pub opened_at: DateTime<Utc>,
}

/// Event: MovementRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub session_id: SessionId,
    pub movement: Movement,
}

/// Event: ExpenseRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRecorded {
    pub session_id: SessionId,
    pub expense: Expense,
}

/// Event: SessionClosed. Carries the write-once reconciliation record so the
/// close is a single atomic append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClosed {
    pub session_id: SessionId,
    pub counted_balance: Money,
    pub notes: Option<String>,
    pub reconciliation: ReconciliationRecord,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    Opened(SessionOpened),
    MovementRecorded(MovementRecorded),
    ExpenseRecorded(ExpenseRecorded),
    Closed(SessionClosed),
}

impl SessionEvent {
    pub const OPENED: &'static str = "caixa.session.opened";
    pub const MOVEMENT_RECORDED: &'static str = "caixa.session.movement_recorded";
    pub const EXPENSE_RECORDED: &'static str = "caixa.session.expense_recorded";
    pub const CLOSED: &'static str = "caixa.session.closed";
}

impl Event for SessionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::Opened(_) => Self::OPENED,
            SessionEvent::MovementRecorded(_) => Self::MOVEMENT_RECORDED,
            SessionEvent::ExpenseRecorded(_) => Self::EXPENSE_RECORDED,
            SessionEvent::Closed(_) => Self::CLOSED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::Opened(e) => e.opened_at,
            SessionEvent::MovementRecorded(e) => e.movement.created_at,
            SessionEvent::ExpenseRecorded(e) => e.expense.created_at,
            SessionEvent::Closed(e) => e.closed_at,
        }
    }
}

impl Aggregate for CashSession {
    type Command = SessionCommand;
    type Event = SessionEvent;
    type Error = LedgerError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SessionEvent::Opened(e) => {
                self.id = e.session_id;
                self.status = SessionStatus::Open;
                self.opened_at = Some(e.opened_at);
                self.opening_balance = e.opening_balance;
                self.opening_notes = e.notes.clone();
                self.created = true;
            }
            SessionEvent::MovementRecorded(e) => {
                self.movement_ids.insert(e.movement.id);
                self.movements.push(e.movement.clone());
            }
            SessionEvent::ExpenseRecorded(e) => {
                self.expense_ids.insert(e.expense.id);
                self.expenses.push(e.expense.clone());
            }
            SessionEvent::Closed(e) => {
                self.status = SessionStatus::Closed;
                self.closed_at = Some(e.closed_at);
                self.counted_balance = Some(e.counted_balance);
                self.closing_notes = e.notes.clone();
                self.reconciliation = Some(e.reconciliation.clone());
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SessionCommand::Open(cmd) => self.handle_open(cmd),
            SessionCommand::RecordMovement(cmd) => self.handle_record_movement(cmd),
            SessionCommand::RecordExpense(cmd) => self.handle_record_expense(cmd),
            SessionCommand::Close(cmd) => self.handle_close(cmd),
        }
    }
}

impl CashSession {
    fn ensure_open(&self) -> Result<(), LedgerError> {
        if !self.created {
            return Err(LedgerError::session_state("no open session"));
        }
        if self.status == SessionStatus::Closed {
            return Err(LedgerError::session_state("session is closed"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenSession) -> Result<Vec<SessionEvent>, LedgerError> {
        if self.created {
            return Err(LedgerError::session_state("session already exists"));
        }
        if cmd.opening_balance.is_negative() {
            return Err(LedgerError::validation(
                "opening balance must not be negative",
            ));
        }

        Ok(vec![SessionEvent::Opened(SessionOpened {
            session_id: cmd.session_id,
            opening_balance: cmd.opening_balance,
            notes: cmd.notes.clone(),
            opened_at: cmd.opened_at,
        })])
    }

    fn handle_record_movement(
        &self,
        cmd: &RecordMovement,
    ) -> Result<Vec<SessionEvent>, LedgerError> {
        self.ensure_open()?;

        let movement = &cmd.movement;
        if movement.session_id != self.id {
            return Err(LedgerError::validation(
                "movement targets a different session",
            ));
        }
        movement.validate()?;

        // Retried append with the same client-generated id: no-op.
        if self.movement_ids.contains(&movement.id) {
            return Ok(vec![]);
        }

        if movement.kind == MovementKind::Sangria {
            let available = self.totals().saldo_dinheiro();
            if movement.amount > available {
                return Err(LedgerError::insufficient_funds(movement.amount, available));
            }
        }

        Ok(vec![SessionEvent::MovementRecorded(MovementRecorded {
            session_id: self.id,
            movement: movement.clone(),
        })])
    }

    fn handle_record_expense(&self, cmd: &RecordExpense) -> Result<Vec<SessionEvent>, LedgerError> {
        self.ensure_open()?;

        let expense = &cmd.expense;
        if expense.session_id != Some(self.id) {
            return Err(LedgerError::validation(
                "expense targets a different session",
            ));
        }
        expense.validate()?;

        if self.expense_ids.contains(&expense.id) {
            return Ok(vec![]);
        }

        Ok(vec![SessionEvent::ExpenseRecorded(ExpenseRecorded {
            session_id: self.id,
            expense: expense.clone(),
        })])
    }

    fn handle_close(&self, cmd: &CloseSession) -> Result<Vec<SessionEvent>, LedgerError> {
        if !self.created {
            return Err(LedgerError::session_state("no open session"));
        }
        if self.status == SessionStatus::Closed {
            return Err(LedgerError::session_state("session already closed"));
        }
        if cmd.counted_balance.is_negative() {
            return Err(LedgerError::validation(
                "counted balance must not be negative",
            ));
        }

        let expected = self.totals().saldo_dinheiro();
        let reconciliation = reconcile(self.id, expected, cmd.counted_balance, cmd.closed_at);

        Ok(vec![SessionEvent::Closed(SessionClosed {
            session_id: self.id,
            counted_balance: cmd.counted_balance,
            notes: cmd.notes.clone(),
            reconciliation,
            closed_at: cmd.closed_at,
        })])
    }
}

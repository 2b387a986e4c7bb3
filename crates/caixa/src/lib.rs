//! `navalha-caixa` — the cash session ledger domain.
//!
//! One `CashSession` aggregate owns a working period of the drawer: it is
//! opened with a float, accumulates immutable movements and expenses, and is
//! closed exactly once against a counted balance, producing a reconciliation
//! record in the same write. Totals are a commutative fold over the movement
//! multiset, so append ordering across devices never matters.

pub mod movement;
pub mod reconciliation;
pub mod session;
pub mod snapshot;
pub mod totals;

pub use movement::{Expense, Movement, MovementFilter, MovementKind, PaidBy, PaymentMethod};
pub use reconciliation::{ReconciliationOutcome, ReconciliationRecord, reconcile};
pub use session::{
    CashSession, CloseSession, OpenSession, RecordExpense, RecordMovement, SessionCommand,
    SessionEvent, SessionStatus,
};
pub use snapshot::SessionSnapshot;
pub use totals::{MethodTotals, SessionTotals};

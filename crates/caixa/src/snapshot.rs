//! Serializable session read model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use navalha_core::{Money, SessionId};

use crate::movement::{Expense, Movement, MovementFilter};
use crate::reconciliation::ReconciliationRecord;
use crate::session::{CashSession, SessionStatus};
use crate::totals::SessionTotals;

/// Point-in-time view of one session: header, ledger and reconciliation.
///
/// This is what queries return, what the transport ships, and what the
/// client cache holds. It carries everything needed to recompute totals, so
/// it is rebuildable from the durable store alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub opening_balance: Money,
    pub opening_notes: Option<String>,
    pub counted_balance: Option<Money>,
    pub closing_notes: Option<String>,
    pub movements: Vec<Movement>,
    pub expenses: Vec<Expense>,
    pub reconciliation: Option<ReconciliationRecord>,
    /// Stream revision this snapshot was built from.
    pub version: u64,
}

impl SessionSnapshot {
    /// Project a rehydrated aggregate. Returns `None` for a stream that was
    /// never opened.
    pub fn from_session(session: &CashSession) -> Option<Self> {
        use navalha_core::AggregateRoot;

        let opened_at = session.opened_at()?;
        Some(Self {
            session_id: session.id_typed(),
            status: session.status(),
            opened_at,
            closed_at: session.closed_at(),
            opening_balance: session.opening_balance(),
            opening_notes: session.opening_notes().map(str::to_string),
            counted_balance: session.counted_balance(),
            closing_notes: session.closing_notes().map(str::to_string),
            movements: session.movements().to_vec(),
            expenses: session.expenses().to_vec(),
            reconciliation: session.reconciliation().cloned(),
            version: session.version(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }

    pub fn totals(&self) -> SessionTotals {
        SessionTotals::compute(self.opening_balance, &self.movements, &self.expenses)
    }

    pub fn movements_matching(&self, filter: &MovementFilter) -> Vec<Movement> {
        self.movements
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use navalha_core::{Aggregate, MovementId};

    use crate::movement::{MovementKind, PaymentMethod};
    use crate::session::{OpenSession, RecordMovement, SessionCommand};

    #[test]
    fn snapshot_of_unopened_stream_is_none() {
        let session = CashSession::empty(SessionId::new());
        assert!(SessionSnapshot::from_session(&session).is_none());
    }

    #[test]
    fn snapshot_round_trips_totals_and_filters() {
        let id = SessionId::new();
        let mut session = CashSession::empty(id);

        let mut apply = |session: &mut CashSession, cmd: SessionCommand| {
            let events = session.handle(&cmd).unwrap();
            for e in &events {
                session.apply(e);
            }
        };

        apply(
            &mut session,
            SessionCommand::Open(OpenSession {
                session_id: id,
                opening_balance: Money::from_centavos(10_000),
                notes: Some("abertura".to_string()),
                opened_at: Utc::now(),
            }),
        );
        apply(
            &mut session,
            SessionCommand::RecordMovement(RecordMovement {
                movement: Movement {
                    id: MovementId::new(),
                    session_id: id,
                    kind: MovementKind::Entrada,
                    category: "venda".to_string(),
                    amount: Money::from_centavos(5_000),
                    payment_method: Some(PaymentMethod::Dinheiro),
                    description: "corte".to_string(),
                    created_at: Utc::now(),
                },
            }),
        );

        let snapshot = SessionSnapshot::from_session(&session).unwrap();
        assert!(snapshot.is_open());
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.totals(), session.totals());

        let cash_only = snapshot.movements_matching(&MovementFilter {
            payment_method: Some(PaymentMethod::Dinheiro),
            ..Default::default()
        });
        assert_eq!(cash_only.len(), 1);

        let pix_only = snapshot.movements_matching(&MovementFilter {
            payment_method: Some(PaymentMethod::Pix),
            ..Default::default()
        });
        assert!(pix_only.is_empty());
    }
}

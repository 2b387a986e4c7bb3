//! Counted-vs-expected reconciliation at close time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use navalha_core::{Money, SessionId};

/// Outcome of counting the drawer against the expected cash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconciliationOutcome {
    Exact,
    Surplus,
    Shortage,
}

/// The write-once record produced when a session closes.
///
/// It is embedded in the `SessionClosed` event, so the closed session and
/// its reconciliation land in the durable store as one atomic write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub session_id: SessionId,
    pub expected_cash: Money,
    pub counted_cash: Money,
    /// counted − expected; negative on shortage.
    pub variance: Money,
    pub outcome: ReconciliationOutcome,
    pub closed_at: DateTime<Utc>,
}

/// Compute the reconciliation outcome.
///
/// Money is integer centavos, so the epsilon is the smallest currency unit:
/// a variance of zero centavos is exact, anything above is surplus, anything
/// below is shortage.
pub fn reconcile(
    session_id: SessionId,
    expected_cash: Money,
    counted_cash: Money,
    closed_at: DateTime<Utc>,
) -> ReconciliationRecord {
    let variance = counted_cash - expected_cash;
    let outcome = if variance.is_zero() {
        ReconciliationOutcome::Exact
    } else if variance.is_positive() {
        ReconciliationOutcome::Surplus
    } else {
        ReconciliationOutcome::Shortage
    };

    ReconciliationRecord {
        session_id,
        expected_cash,
        counted_cash,
        variance,
        outcome,
        closed_at,
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use navalha_core::{ExpenseId, LedgerError, LedgerResult, Money, MovementId, SessionId};

/// Kind of a cash movement.
///
/// The sign of the cash effect is implied by the kind; amounts are always
/// stored positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    /// Money in: a settled sale or other receipt.
    Entrada,
    /// Money out through the drawer.
    Saida,
    /// Cash withdrawal for safekeeping/deposit.
    Sangria,
    /// Cash added to replenish change.
    Reforco,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Entrada => "entrada",
            MovementKind::Saida => "saida",
            MovementKind::Sangria => "sangria",
            MovementKind::Reforco => "reforco",
        }
    }
}

/// Settlement method of an entrada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Dinheiro,
    Debito,
    Credito,
    Pix,
}

/// A signed cash movement.
///
/// Immutable once appended: corrections are compensating entries, never
/// edits or deletes. The client-generated `id` doubles as the idempotency
/// key for durable appends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub session_id: SessionId,
    pub kind: MovementKind,
    /// Free-form business category ("venda", "vale", "gorjeta", ...).
    pub category: String,
    pub amount: Money,
    /// Required for entrada; forbidden for the drawer-cash kinds
    /// (saída/sangria/reforço are settled in physical currency by policy).
    pub payment_method: Option<PaymentMethod>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    /// Deterministic validation, checked before any state mutation.
    pub fn validate(&self) -> LedgerResult<()> {
        if !self.amount.is_positive() {
            return Err(LedgerError::validation("movement amount must be positive"));
        }

        match self.kind {
            MovementKind::Entrada => {
                if self.payment_method.is_none() {
                    return Err(LedgerError::validation("entrada requires a payment method"));
                }
            }
            MovementKind::Saida => {
                if self.payment_method.is_some() {
                    return Err(LedgerError::validation(
                        "saida is settled in drawer cash; payment method not allowed",
                    ));
                }
            }
            MovementKind::Sangria | MovementKind::Reforco => {
                if self.payment_method.is_some() {
                    return Err(LedgerError::validation(format!(
                        "{} is settled in drawer cash; payment method not allowed",
                        self.kind.as_str()
                    )));
                }
                if self.description.trim().is_empty() {
                    return Err(LedgerError::validation(format!(
                        "{} requires a reason",
                        self.kind.as_str()
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Who paid an incidental expense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaidBy {
    /// Paid from the drawer; debits cash-on-hand.
    Caixa,
    /// Paid personally by the owner; never touches the drawer.
    Dono,
}

/// An incidental expense (despesa).
///
/// May be logged without an open session (`session_id: None`) when paid by
/// the owner; a drawer-paid expense always belongs to the open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub session_id: Option<SessionId>,
    pub description: String,
    pub category: String,
    pub amount: Money,
    pub paid_by: PaidBy,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Expense {
    pub fn validate(&self) -> LedgerResult<()> {
        if !self.amount.is_positive() {
            return Err(LedgerError::validation("expense amount must be positive"));
        }
        if self.description.trim().is_empty() {
            return Err(LedgerError::validation("expense requires a description"));
        }
        Ok(())
    }

    /// Whether this expense reduces cash-on-hand.
    pub fn affects_cash(&self) -> bool {
        matches!(self.paid_by, PaidBy::Caixa)
    }
}

/// Query filter for listing movements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub kind: Option<MovementKind>,
    pub payment_method: Option<PaymentMethod>,
    pub category: Option<String>,
}

impl MovementFilter {
    pub fn matches(&self, movement: &Movement) -> bool {
        if let Some(kind) = self.kind {
            if movement.kind != kind {
                return false;
            }
        }
        if let Some(method) = self.payment_method {
            if movement.payment_method != Some(method) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &movement.category != category {
                return false;
            }
        }
        true
    }
}

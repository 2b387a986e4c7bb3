//! Order-independent aggregation of a session's ledger.

use serde::{Deserialize, Serialize};

use navalha_core::Money;

use crate::movement::{Expense, Movement, MovementKind, PaymentMethod};

/// Entrada totals broken down by settlement method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MethodTotals {
    pub dinheiro: Money,
    pub debito: Money,
    pub credito: Money,
    pub pix: Money,
}

impl MethodTotals {
    pub fn get(&self, method: PaymentMethod) -> Money {
        match method {
            PaymentMethod::Dinheiro => self.dinheiro,
            PaymentMethod::Debito => self.debito,
            PaymentMethod::Credito => self.credito,
            PaymentMethod::Pix => self.pix,
        }
    }

    fn add(&mut self, method: PaymentMethod, amount: Money) {
        match method {
            PaymentMethod::Dinheiro => self.dinheiro += amount,
            PaymentMethod::Debito => self.debito += amount,
            PaymentMethod::Credito => self.credito += amount,
            PaymentMethod::Pix => self.pix += amount,
        }
    }

    pub fn total(&self) -> Money {
        self.dinheiro + self.debito + self.credito + self.pix
    }
}

/// Running totals for one session.
///
/// The aggregation is a commutative fold over the movement/expense multiset:
/// maintaining it incrementally (`record_movement`/`record_expense`) and
/// recomputing it from scratch (`compute`) must agree for any permutation of
/// the same set. That property is what makes unordered appends from multiple
/// devices safe, and it is tested, not assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTotals {
    pub opening_balance: Money,
    /// Entrada totals per payment method.
    pub por_metodo: MethodTotals,
    /// Cash added to replenish change.
    pub reforcos: Money,
    /// Plain saída movements.
    pub saidas: Money,
    /// Cash withdrawals for safekeeping.
    pub sangrias: Money,
    /// Drawer-paid expenses.
    pub despesas_caixa: Money,
}

impl SessionTotals {
    pub fn new(opening_balance: Money) -> Self {
        Self {
            opening_balance,
            por_metodo: MethodTotals::default(),
            reforcos: Money::ZERO,
            saidas: Money::ZERO,
            sangrias: Money::ZERO,
            despesas_caixa: Money::ZERO,
        }
    }

    /// Full recomputation over the ledger.
    pub fn compute<'a>(
        opening_balance: Money,
        movements: impl IntoIterator<Item = &'a Movement>,
        expenses: impl IntoIterator<Item = &'a Expense>,
    ) -> Self {
        let mut totals = Self::new(opening_balance);
        for movement in movements {
            totals.record_movement(movement);
        }
        for expense in expenses {
            totals.record_expense(expense);
        }
        totals
    }

    /// Incremental maintenance: fold one movement in.
    pub fn record_movement(&mut self, movement: &Movement) {
        match movement.kind {
            MovementKind::Entrada => {
                if let Some(method) = movement.payment_method {
                    self.por_metodo.add(method, movement.amount);
                }
            }
            MovementKind::Reforco => self.reforcos += movement.amount,
            MovementKind::Saida => self.saidas += movement.amount,
            MovementKind::Sangria => self.sangrias += movement.amount,
        }
    }

    /// Incremental maintenance: fold one expense in.
    ///
    /// Owner-paid expenses are recorded in the ledger but never change a
    /// total.
    pub fn record_expense(&mut self, expense: &Expense) {
        if expense.affects_cash() {
            self.despesas_caixa += expense.amount;
        }
    }

    /// Total money in: entradas across all methods plus reforços.
    pub fn entradas(&self) -> Money {
        self.por_metodo.total() + self.reforcos
    }

    /// Total money out: saídas plus sangrias.
    pub fn saidas_total(&self) -> Money {
        self.saidas + self.sangrias
    }

    /// Session balance across all payment methods.
    pub fn saldo(&self) -> Money {
        self.opening_balance + self.entradas() - self.saidas_total() - self.despesas_caixa
    }

    /// Cash-on-hand: the physical-currency slice of the balance.
    ///
    /// Saída, sangria and drawer-paid expenses always settle in cash, so the
    /// only method split needed is on the entrada side.
    pub fn saldo_dinheiro(&self) -> Money {
        self.opening_balance + self.por_metodo.dinheiro + self.reforcos
            - self.saidas
            - self.sangrias
            - self.despesas_caixa
    }
}

//! Integration tests for the full command pipeline.
//!
//! Command → SessionStore → EventBus → snapshot queries, exercising the
//! durable invariants: single open session, capability gating at the write
//! point, the sangria cash floor, idempotent replay and write-once
//! reconciliation.

use std::sync::{Arc, Barrier};

use chrono::Utc;
use serde_json::Value as JsonValue;

use navalha_access::{CapabilityPolicy, DeviceClass, DeviceContext, Role};
use navalha_caixa::{
    Expense, Movement, MovementFilter, MovementKind, PaidBy, PaymentMethod, ReconciliationOutcome,
};
use navalha_core::{DeviceId, ExpenseId, LedgerError, Money, MovementId, SessionId};
use navalha_events::{EventBus, EventEnvelope, InMemoryEventBus};

use crate::service::CaixaService;
use crate::session_store::{InMemorySessionStore, SessionStore};

type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;
type Service = CaixaService<Arc<InMemorySessionStore>, Arc<Bus>>;

fn service() -> (Service, Arc<InMemorySessionStore>, Arc<Bus>) {
    navalha_observability::init();
    let store = Arc::new(InMemorySessionStore::new());
    let bus = Arc::new(Bus::new());
    let service = CaixaService::new(store.clone(), bus.clone(), CapabilityPolicy);
    (service, store, bus)
}

fn trusted() -> DeviceContext {
    DeviceContext::new(DeviceId::new(), DeviceClass::Trusted, Role::STAFF)
}

fn kiosk() -> DeviceContext {
    DeviceContext::new(DeviceId::new(), DeviceClass::Kiosk, Role::STAFF)
}

fn entrada(session_id: SessionId, centavos: i64, method: PaymentMethod) -> Movement {
    Movement {
        id: MovementId::new(),
        session_id,
        kind: MovementKind::Entrada,
        category: "venda".to_string(),
        amount: Money::from_centavos(centavos),
        payment_method: Some(method),
        description: "corte".to_string(),
        created_at: Utc::now(),
    }
}

fn sangria(session_id: SessionId, centavos: i64) -> Movement {
    Movement {
        id: MovementId::new(),
        session_id,
        kind: MovementKind::Sangria,
        category: "sangria".to_string(),
        amount: Money::from_centavos(centavos),
        payment_method: None,
        description: "deposito no cofre".to_string(),
        created_at: Utc::now(),
    }
}

fn despesa(session_id: Option<SessionId>, centavos: i64, paid_by: PaidBy) -> Expense {
    Expense {
        id: ExpenseId::new(),
        session_id,
        description: "toalhas".to_string(),
        category: "material".to_string(),
        amount: Money::from_centavos(centavos),
        paid_by,
        notes: None,
        created_at: Utc::now(),
    }
}

#[test]
fn open_record_close_reconciles() {
    let (service, _, _) = service();
    let device = trusted();

    // open(100) → despesa(20, caixa) → entrada(50, dinheiro) ⇒ expected 130
    let opened = service
        .open(Money::from_centavos(10_000), None, &device)
        .unwrap();
    let sid = opened.session_id;

    service
        .record_expense(despesa(Some(sid), 2_000, PaidBy::Caixa), &device)
        .unwrap();
    service
        .record_movement(entrada(sid, 5_000, PaymentMethod::Dinheiro), &device)
        .unwrap();

    let totals = service.totals().unwrap().unwrap();
    assert_eq!(totals.saldo_dinheiro(), Money::from_centavos(13_000));

    let closed = service
        .close(Money::from_centavos(13_000), None, &device)
        .unwrap();
    let rec = closed.reconciliation.expect("reconciliation record");
    assert_eq!(rec.outcome, ReconciliationOutcome::Exact);
    assert_eq!(rec.variance, Money::ZERO);

    // The slot is released; a new day can start.
    assert!(service.current_session().unwrap().is_none());
    service
        .open(Money::from_centavos(5_000), None, &device)
        .unwrap();
}

#[test]
fn close_shortage_and_surplus_outcomes() {
    for (counted, outcome, variance) in [
        (12_500, ReconciliationOutcome::Shortage, -500),
        (14_000, ReconciliationOutcome::Surplus, 1_000),
    ] {
        let (service, _, _) = service();
        let device = trusted();

        let opened = service
            .open(Money::from_centavos(10_000), None, &device)
            .unwrap();
        let sid = opened.session_id;
        service
            .record_expense(despesa(Some(sid), 2_000, PaidBy::Caixa), &device)
            .unwrap();
        service
            .record_movement(entrada(sid, 5_000, PaymentMethod::Dinheiro), &device)
            .unwrap();

        let closed = service
            .close(Money::from_centavos(counted), None, &device)
            .unwrap();
        let rec = closed.reconciliation.expect("reconciliation record");
        assert_eq!(rec.outcome, outcome);
        assert_eq!(rec.variance, Money::from_centavos(variance));
    }
}

#[test]
fn concurrent_opens_exactly_one_wins() {
    let store = Arc::new(InMemorySessionStore::new());
    let bus = Arc::new(Bus::new());
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let store = store.clone();
            let bus = bus.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                // Each terminal gets its own service over the shared store.
                let service = CaixaService::new(store, bus, CapabilityPolicy);
                barrier.wait();
                service.open(Money::from_centavos(10_000), None, &trusted())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let oks = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(oks, 1);
    let err = results
        .into_iter()
        .find_map(Result::err)
        .expect("one open must lose the race");
    assert!(matches!(err, LedgerError::SessionState(_)));
}

#[test]
fn double_open_from_same_terminal_is_rejected() {
    let (service, _, _) = service();
    let device = trusted();

    service
        .open(Money::from_centavos(1_000), None, &device)
        .unwrap();
    let err = service
        .open(Money::from_centavos(1_000), None, &device)
        .unwrap_err();
    assert!(matches!(err, LedgerError::SessionState(_)));
}

#[test]
fn kiosk_is_gated_at_the_write_point() {
    let (service, _, _) = service();

    // A kiosk cannot open, and nothing was written.
    let err = service
        .open(Money::from_centavos(1_000), None, &kiosk())
        .unwrap_err();
    assert!(matches!(err, LedgerError::PermissionDenied(_)));
    assert!(service.current_session().unwrap().is_none());

    // Open on a trusted terminal, then check per-action gating.
    let opened = service
        .open(Money::from_centavos(10_000), None, &trusted())
        .unwrap();
    let sid = opened.session_id;

    let err = service
        .record_movement(sangria(sid, 1_000), &kiosk())
        .unwrap_err();
    assert!(matches!(err, LedgerError::PermissionDenied(_)));

    let err = service
        .close(Money::from_centavos(10_000), None, &kiosk())
        .unwrap_err();
    assert!(matches!(err, LedgerError::PermissionDenied(_)));

    // Entrada is a business event: the kiosk settles a comanda just fine,
    // and a despesa is within its grant.
    service
        .record_movement(entrada(sid, 3_000, PaymentMethod::Pix), &kiosk())
        .unwrap();
    service
        .record_expense(despesa(Some(sid), 500, PaidBy::Caixa), &kiosk())
        .unwrap();
}

#[test]
fn sangria_floor_is_checked_against_the_store() {
    let (service, _, _) = service();
    let device = trusted();

    let opened = service
        .open(Money::from_centavos(10_000), None, &device)
        .unwrap();
    let sid = opened.session_id;

    let err = service
        .record_movement(sangria(sid, 10_001), &device)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    service.record_movement(sangria(sid, 4_000), &device).unwrap();
    let totals = service.totals().unwrap().unwrap();
    assert_eq!(totals.saldo_dinheiro(), Money::from_centavos(6_000));
}

#[test]
fn replayed_movement_is_applied_once() {
    let (service, store, _) = service();
    let device = trusted();

    let opened = service
        .open(Money::from_centavos(10_000), None, &device)
        .unwrap();
    let sid = opened.session_id;

    let movement = entrada(sid, 5_000, PaymentMethod::Dinheiro);
    let first = service.record_movement(movement.clone(), &device).unwrap();

    // Simulates a retried flush after a lost ack.
    let second = service.record_movement(movement, &device).unwrap();
    assert_eq!(first, second);

    let totals = service.totals().unwrap().unwrap();
    assert_eq!(totals.saldo_dinheiro(), Money::from_centavos(15_000));

    // One opened + one movement event; the replay appended nothing.
    assert_eq!(store.load_stream(sid).unwrap().len(), 2);
}

#[test]
fn loose_expense_routing() {
    let (service, _, _) = service();
    let device = trusted();

    // Drawer-paid without an open session: rejected.
    let err = service
        .record_expense(despesa(None, 1_000, PaidBy::Caixa), &device)
        .unwrap_err();
    assert!(matches!(err, LedgerError::SessionState(_)));

    // Owner-paid without a session: fine, idempotent, and outside totals.
    let loose = despesa(None, 1_000, PaidBy::Dono);
    let stored = service.record_expense(loose.clone(), &device).unwrap();
    let replay = service.record_expense(loose, &device).unwrap();
    assert_eq!(stored, replay);
    assert_eq!(service.loose_expenses().unwrap().len(), 1);

    // Owner-paid inside a session: in the ledger, absent from totals.
    let opened = service
        .open(Money::from_centavos(1_000), None, &device)
        .unwrap();
    service
        .record_expense(despesa(Some(opened.session_id), 700, PaidBy::Dono), &device)
        .unwrap();
    let snapshot = service.current_session().unwrap().unwrap();
    assert_eq!(snapshot.expenses.len(), 1);
    assert_eq!(snapshot.totals().despesas_caixa, Money::ZERO);
    assert_eq!(snapshot.totals().saldo(), Money::from_centavos(1_000));
}

#[test]
fn closed_session_accepts_nothing_more() {
    let (service, _, _) = service();
    let device = trusted();

    let opened = service
        .open(Money::from_centavos(1_000), None, &device)
        .unwrap();
    let sid = opened.session_id;
    service
        .close(Money::from_centavos(1_000), None, &device)
        .unwrap();

    let err = service
        .record_movement(entrada(sid, 100, PaymentMethod::Pix), &device)
        .unwrap_err();
    assert!(matches!(err, LedgerError::SessionState(_)));

    let err = service
        .record_expense(despesa(Some(sid), 100, PaidBy::Caixa), &device)
        .unwrap_err();
    assert!(matches!(err, LedgerError::SessionState(_)));

    // Close is write-once: no open session remains to close.
    let err = service
        .close(Money::from_centavos(1_000), None, &device)
        .unwrap_err();
    assert!(matches!(err, LedgerError::SessionState(_)));
}

#[test]
fn movement_queries_apply_the_filter() {
    let (service, _, _) = service();
    let device = trusted();

    let opened = service
        .open(Money::from_centavos(10_000), None, &device)
        .unwrap();
    let sid = opened.session_id;
    service
        .record_movement(entrada(sid, 1_000, PaymentMethod::Dinheiro), &device)
        .unwrap();
    service
        .record_movement(entrada(sid, 2_000, PaymentMethod::Pix), &device)
        .unwrap();
    service.record_movement(sangria(sid, 500), &device).unwrap();

    let all = service.movements(&MovementFilter::default()).unwrap();
    assert_eq!(all.len(), 3);

    let pix = service
        .movements(&MovementFilter {
            payment_method: Some(PaymentMethod::Pix),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(pix.len(), 1);

    let sangrias = service
        .movements(&MovementFilter {
            kind: Some(MovementKind::Sangria),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(sangrias.len(), 1);
    assert_eq!(sangrias[0].amount, Money::from_centavos(500));
}

#[test]
fn committed_events_are_published() {
    let (service, _, bus) = service();
    let subscription = bus.subscribe();

    service
        .open(Money::from_centavos(1_000), None, &trusted())
        .unwrap();

    let envelope = subscription.try_recv().expect("opened event published");
    assert_eq!(envelope.event_type(), "caixa.session.opened");
    assert_eq!(envelope.sequence_number(), 1);
}

#[test]
fn startup_rehydration_is_idempotent() {
    let (service, _, _) = service();
    let device = trusted();

    let opened = service
        .open(Money::from_centavos(10_000), None, &device)
        .unwrap();
    service
        .record_movement(
            entrada(opened.session_id, 5_000, PaymentMethod::Dinheiro),
            &device,
        )
        .unwrap();

    let first = service.current_session().unwrap().unwrap();
    let second = service.current_session().unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.version, 2);
}

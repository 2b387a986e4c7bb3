use std::hint::black_box;

use chrono::Utc;
use criterion::{Criterion, criterion_group, criterion_main};

use navalha_caixa::{Movement, MovementKind, PaymentMethod, SessionTotals};
use navalha_core::{Money, MovementId, SessionId};

fn ledger(size: usize) -> (SessionId, Vec<Movement>) {
    let session_id = SessionId::new();
    let movements = (0..size)
        .map(|i| {
            let (kind, method) = match i % 5 {
                0 => (MovementKind::Entrada, Some(PaymentMethod::Dinheiro)),
                1 => (MovementKind::Entrada, Some(PaymentMethod::Pix)),
                2 => (MovementKind::Reforco, None),
                3 => (MovementKind::Saida, None),
                _ => (MovementKind::Entrada, Some(PaymentMethod::Credito)),
            };
            Movement {
                id: MovementId::new(),
                session_id,
                kind,
                category: "venda".to_string(),
                amount: Money::from_centavos((i % 997 + 1) as i64),
                payment_method: method,
                description: "bench".to_string(),
                created_at: Utc::now(),
            }
        })
        .collect();
    (session_id, movements)
}

fn bench_full_recomputation(c: &mut Criterion) {
    let (_, movements) = ledger(10_000);

    c.bench_function("totals/full_recomputation_10k", |b| {
        b.iter(|| {
            let totals =
                SessionTotals::compute(Money::from_centavos(10_000), black_box(&movements), &[]);
            black_box(totals.saldo_dinheiro())
        })
    });
}

fn bench_incremental(c: &mut Criterion) {
    let (_, movements) = ledger(10_000);

    c.bench_function("totals/incremental_10k", |b| {
        b.iter(|| {
            let mut totals = SessionTotals::new(Money::from_centavos(10_000));
            for movement in black_box(&movements) {
                totals.record_movement(movement);
            }
            black_box(totals.saldo())
        })
    });
}

criterion_group!(benches, bench_full_recomputation, bench_incremental);
criterion_main!(benches);

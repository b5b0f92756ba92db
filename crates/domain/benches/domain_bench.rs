use std::collections::BTreeMap;

use common::{Money, ProductId, ReservationId, SessionId, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    Catalog, InMemoryOrderRepository, NewOrder, OrderLine, OrderService, PaymentMethod, Product,
};

fn new_order() -> NewOrder {
    NewOrder {
        user_id: UserId::new("bench"),
        reservation_id: ReservationId::new(),
        lines: vec![OrderLine::new("SKU-BENCH", 2, Money::from_cents(1000))],
        shipping_address: "Bench Road 1".into(),
        total_price: Money::from_cents(2000),
        payment_method: PaymentMethod::Card,
    }
}

fn bench_reserve_release(c: &mut Criterion) {
    let catalog = Catalog::with_products([Product::new(
        "SKU-BENCH",
        "Benchmark Widget",
        Money::from_cents(1000),
        1_000_000,
    )]);
    let items: BTreeMap<ProductId, u32> = [(ProductId::new("SKU-BENCH"), 2)].into_iter().collect();

    c.bench_function("domain/reserve_release", |b| {
        b.iter(|| {
            let id = ReservationId::new();
            catalog.reserve(id, &items).unwrap();
            catalog.release(id);
        });
    });
}

fn bench_create_and_pay(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = OrderService::new(InMemoryOrderRepository::new());

    c.bench_function("domain/create_attach_pay", |b| {
        b.iter(|| {
            rt.block_on(async {
                let order = service.create(new_order()).await.unwrap();
                let session = SessionId::new(order.id().to_string());
                service.attach_session(order.id(), session.clone()).await.unwrap();
                service.mark_paid_by_session(&session).await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_reserve_release, bench_create_and_pay);
criterion_main!(benches);

use criterion::{criterion_group, criterion_main, Criterion};
use hudson_core::{InMemoryCatalog, ItemId, MembershipAttrs, MembershipId, SetId, StatePointer, TenantId};
use hudson_live::{
    BroadcastGroup, LiveConfig, LiveEvent, LiveService, NavCommand, ServerFrame, StoreConfig,
};
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// A service with one set of `items` memberships. The tempdir must outlive it.
fn service_with_set(rt: &Runtime, items: usize) -> (tempfile::TempDir, LiveService, TenantId, SetId) {
    let dir = tempfile::tempdir().unwrap();
    let service = LiveService::open(
        StoreConfig::for_testing(dir.path().join("db")),
        Arc::new(InMemoryCatalog::new()),
        LiveConfig::default(),
    )
    .unwrap();
    let tenant = TenantId::new();
    let set_id = rt.block_on(async {
        let set = service.sets().create_set(tenant, "Bench", "bench", None).await.unwrap();
        for _ in 0..items {
            service
                .positions()
                .add(tenant, set.id, ItemId::new(), MembershipAttrs::default(), None)
                .await
                .unwrap();
        }
        set.id
    });
    (dir, service, tenant, set_id)
}

fn bench_jump_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (_dir, service, tenant, set_id) = service_with_set(&rt, 50);
    let mut position = 0;

    c.bench_function("jump_to_50_items", |b| {
        b.iter(|| {
            position = position % 50 + 1;
            let pointer = rt
                .block_on(service.navigate(tenant, set_id, NavCommand::JumpTo(black_box(position))))
                .unwrap();
            black_box(pointer);
        })
    });
}

fn bench_reorder_200(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (_dir, service, tenant, set_id) = service_with_set(&rt, 200);
    let ids: Vec<MembershipId> = service
        .list_memberships(tenant, set_id)
        .unwrap()
        .iter()
        .map(|m| m.id)
        .collect();
    let reversed: Vec<MembershipId> = ids.iter().rev().copied().collect();
    let mut flip = false;

    c.bench_function("reorder_200_items", |b| {
        b.iter(|| {
            flip = !flip;
            let order = if flip { &reversed } else { &ids };
            let rows = rt
                .block_on(service.positions().reorder(tenant, set_id, black_box(order)))
                .unwrap();
            black_box(rows);
        })
    });
}

fn bench_fanout_100_subscribers(c: &mut Criterion) {
    let group = BroadcastGroup::new(1024);
    let mut receivers: Vec<_> = (0..100).map(|_| group.subscribe()).collect();
    let event = Arc::new(LiveEvent::Pointer(StatePointer::empty(SetId::new())));

    c.bench_function("fanout_pointer_100_subscribers", |b| {
        b.iter(|| {
            black_box(group.publish(event.clone()));
            for rx in receivers.iter_mut() {
                black_box(rx.try_recv());
            }
        })
    });
}

fn bench_pointer_frame_encode(c: &mut Criterion) {
    let frame = ServerFrame::Pointer(StatePointer::empty(SetId::new()).with_image_index(2));

    c.bench_function("pointer_frame_encode", |b| {
        b.iter(|| black_box(black_box(&frame).encode().unwrap()))
    });
}

criterion_group!(
    benches,
    bench_jump_latency,
    bench_reorder_200,
    bench_fanout_100_subscribers,
    bench_pointer_frame_encode,
);
criterion_main!(benches);

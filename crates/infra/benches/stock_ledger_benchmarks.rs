use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::thread;

use chrono::Utc;
use serde_json::Value as JsonValue;
use storefront_core::{StockLocationId, VariantId};
use storefront_events::{EventBus, EventEnvelope, InMemoryEventBus};
use storefront_infra::projections::{InMemoryCursorStore, StockLevelsProjection, VariantStockLevel};
use storefront_infra::read_model::InMemoryStore;
use storefront_infra::stock_ledger::StockLedger;
use storefront_infra::stock_store::InMemoryStockStore;
use storefront_infra::variant_cache::InMemoryVariantCache;
use storefront_inventory::{InventoryCacheStrategy, StockItemId};

type Envelopes = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Ledger = StockLedger<InMemoryStockStore, Envelopes, InMemoryVariantCache>;

fn setup(strategy: InventoryCacheStrategy) -> (Arc<Ledger>, StockItemId, Envelopes) {
    let bus: Envelopes = Arc::new(InMemoryEventBus::new());
    let ledger = StockLedger::new(InMemoryStockStore::new(), bus.clone(), InMemoryVariantCache::new(), strategy);
    let id = ledger
        .create_stock_item(VariantId::new(), StockLocationId::new(), true, Utc::now())
        .unwrap()
        .id_typed();
    (Arc::new(ledger), id, bus)
}

fn bench_adjust_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("adjust_latency");

    for strategy in [InventoryCacheStrategy::EveryChange, InventoryCacheStrategy::BoundaryCrossing] {
        group.bench_function(format!("{strategy:?}"), |b| {
            let (ledger, id, _) = setup(strategy);
            let mut sign = 1;
            b.iter(|| {
                sign = -sign;
                ledger.adjust_count_on_hand(id, black_box(sign * 3), Utc::now()).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_contended_adjust(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_adjust");
    const PER_THREAD: usize = 100;

    for threads in [1usize, 2, 4, 8] {
        group.throughput(Throughput::Elements((threads * PER_THREAD) as u64));
        group.bench_with_input(BenchmarkId::new("same_item", threads), &threads, |b, &threads| {
            let (ledger, id, _) = setup(InventoryCacheStrategy::EveryChange);
            b.iter(|| {
                thread::scope(|s| {
                    for t in 0..threads {
                        let ledger = &ledger;
                        s.spawn(move || {
                            let delta = if t % 2 == 0 { 1 } else { -1 };
                            for _ in 0..PER_THREAD {
                                ledger.adjust_count_on_hand(id, delta, Utc::now()).unwrap();
                            }
                        });
                    }
                });
            });
        });
    }

    group.finish();
}

fn bench_projection_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("stock_levels_rebuild");

    for adjustments in [100usize, 1_000] {
        let (ledger, id, bus) = setup(InventoryCacheStrategy::EveryChange);
        let inbox = bus.subscribe();
        for n in 0..adjustments {
            ledger.adjust_count_on_hand(id, if n % 2 == 0 { 2 } else { -1 }, Utc::now()).unwrap();
        }
        let envelopes = inbox.drain();

        group.throughput(Throughput::Elements(envelopes.len() as u64));
        group.bench_with_input(BenchmarkId::new("replay", adjustments), &envelopes, |b, envelopes| {
            let projection = StockLevelsProjection::new(
                InMemoryStore::<VariantId, VariantStockLevel>::new(),
                InMemoryCursorStore::new(),
            );
            b.iter(|| projection.rebuild_from_scratch(black_box(envelopes.clone())).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_adjust_latency, bench_contended_adjust, bench_projection_rebuild);
criterion_main!(benches);

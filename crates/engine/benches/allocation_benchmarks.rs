use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;

use packwave_core::{AggregateId, UserId, WarehouseId};
use packwave_demand::{
    AddLine, ApproveDocument, DemandCategory, DemandDocument, DemandDocumentCommand, DemandKind,
    DocumentId, OpenDocument,
};
use packwave_engine::AllocationEngine;
use packwave_events::{EventEnvelope, InMemoryEventBus};
use packwave_infra::event_store::InMemoryEventStore;
use packwave_products::{CreateProduct, Product, ProductCommand, ProductId};
use packwave_stock::{
    LedgerId, OpenLedger, ReceiveStock, RegisterStorageUnit, StockLedger, StockLedgerCommand,
    StorageUnitId, Zone,
};

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Engine = AllocationEngine<Arc<InMemoryEventStore>, Bus>;

struct Setup {
    engine: Engine,
    warehouse_id: WarehouseId,
    product_id: ProductId,
    unit_id: StorageUnitId,
    actor: UserId,
}

fn setup(initial_stock: u32) -> Setup {
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let engine = AllocationEngine::new(store, bus);
    let warehouse_id = WarehouseId::new();
    let ledger_id = LedgerId::for_warehouse(warehouse_id);
    let actor = UserId::new();

    engine
        .dispatcher()
        .dispatch::<StockLedger>(
            warehouse_id,
            ledger_id.0,
            "stock.ledger",
            StockLedgerCommand::OpenLedger(OpenLedger {
                warehouse_id,
                ledger_id,
                occurred_at: Utc::now(),
            }),
            |_, id| StockLedger::empty(LedgerId::new(id)),
        )
        .unwrap();

    let product_id = ProductId::new(AggregateId::new());
    engine
        .dispatcher()
        .dispatch::<Product>(
            warehouse_id,
            product_id.0,
            "products.product",
            ProductCommand::CreateProduct(CreateProduct {
                warehouse_id,
                product_id,
                sku: "BENCH-SKU".to_string(),
                name: "Benchmark product".to_string(),
                barcode: None,
                occurred_at: Utc::now(),
            }),
            |_, id| Product::empty(ProductId::new(id)),
        )
        .unwrap();

    let unit_id = StorageUnitId::new(AggregateId::new());
    engine
        .dispatcher()
        .dispatch::<StockLedger>(
            warehouse_id,
            ledger_id.0,
            "stock.ledger",
            StockLedgerCommand::RegisterStorageUnit(RegisterStorageUnit {
                warehouse_id,
                ledger_id,
                storage_unit_id: unit_id,
                zone: Zone::new("A"),
                occurred_at: Utc::now(),
            }),
            |_, id| StockLedger::empty(LedgerId::new(id)),
        )
        .unwrap();

    if initial_stock > 0 {
        engine
            .dispatcher()
            .dispatch::<StockLedger>(
                warehouse_id,
                ledger_id.0,
                "stock.ledger",
                StockLedgerCommand::ReceiveStock(ReceiveStock {
                    warehouse_id,
                    ledger_id,
                    storage_unit_id: unit_id,
                    product_id,
                    quantity: initial_stock,
                    occurred_at: Utc::now(),
                }),
                |_, id| StockLedger::empty(LedgerId::new(id)),
            )
            .unwrap();
    }

    Setup {
        engine,
        warehouse_id,
        product_id,
        unit_id,
        actor,
    }
}

fn approved_document(s: &Setup, quantity: u32) -> DocumentId {
    let document_id = DocumentId::new(AggregateId::new());
    let dispatch = |cmd: DemandDocumentCommand| {
        s.engine
            .dispatcher()
            .dispatch::<DemandDocument>(
                s.warehouse_id,
                document_id.0,
                "demand.document",
                cmd,
                |_, id| DemandDocument::empty(DocumentId::new(id)),
            )
            .unwrap();
    };
    dispatch(DemandDocumentCommand::OpenDocument(OpenDocument {
        warehouse_id: s.warehouse_id,
        document_id,
        category: DemandCategory::Order,
        kind: DemandKind::Item,
        occurred_at: Utc::now(),
    }));
    dispatch(DemandDocumentCommand::AddLine(AddLine {
        warehouse_id: s.warehouse_id,
        document_id,
        product_id: s.product_id,
        quantity,
        occurred_at: Utc::now(),
    }));
    dispatch(DemandDocumentCommand::ApproveDocument(ApproveDocument {
        warehouse_id: s.warehouse_id,
        document_id,
        occurred_at: Utc::now(),
    }));
    document_id
}

/// Latency of one receive command through the full dispatch pipeline
/// (load, rehydrate, decide, append, publish) as the stream grows.
fn bench_receive_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_receive");
    group.throughput(Throughput::Elements(1));

    group.bench_function("dispatch_receive", |b| {
        let s = setup(0);
        let ledger_id = LedgerId::for_warehouse(s.warehouse_id);
        b.iter(|| {
            s.engine
                .dispatcher()
                .dispatch::<StockLedger>(
                    s.warehouse_id,
                    ledger_id.0,
                    "stock.ledger",
                    StockLedgerCommand::ReceiveStock(ReceiveStock {
                        warehouse_id: s.warehouse_id,
                        ledger_id,
                        storage_unit_id: s.unit_id,
                        product_id: s.product_id,
                        quantity: 1,
                        occurred_at: Utc::now(),
                    }),
                    |_, id| StockLedger::empty(LedgerId::new(id)),
                )
                .unwrap();
        });
    });

    group.finish();
}

/// Full allocate + cancel cycle: plan, atomic commit, job creation,
/// rollback. The hot path of the whole subsystem.
fn bench_allocate_cancel_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");
    group.throughput(Throughput::Elements(1));

    group.bench_function("allocate_then_cancel", |b| {
        let s = setup(1_000_000);
        let document_id = approved_document(&s, 5);
        b.iter(|| {
            let outcome = s
                .engine
                .allocate(s.warehouse_id, black_box(document_id), s.actor)
                .unwrap();
            black_box(&outcome);
            s.engine
                .cancel_document(s.warehouse_id, document_id, "bench", s.actor)
                .unwrap();
            // Cancellation revokes approval; restore it for the next pass.
            s.engine
                .dispatcher()
                .dispatch::<DemandDocument>(
                    s.warehouse_id,
                    document_id.0,
                    "demand.document",
                    DemandDocumentCommand::ApproveDocument(ApproveDocument {
                        warehouse_id: s.warehouse_id,
                        document_id,
                        occurred_at: Utc::now(),
                    }),
                    |_, id| DemandDocument::empty(DocumentId::new(id)),
                )
                .unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_receive_dispatch, bench_allocate_cancel_cycle);
criterion_main!(benches);

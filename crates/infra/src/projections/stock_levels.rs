use serde_json::Value as JsonValue;

use packwave_core::WarehouseId;
use packwave_events::EventEnvelope;
use packwave_products::ProductId;
use packwave_stock::StockLedgerEvent;

use super::cursors::{CursorCheck, StreamCursors};
use super::ProjectionError;
use crate::read_model::WarehouseStore;

/// Queryable stock read model: physical + committed quantity per product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevelReadModel {
    pub product_id: ProductId,
    pub physical_quantity: u32,
    pub hard_committed: u32,
}

impl StockLevelReadModel {
    pub fn physical_available(&self) -> u32 {
        self.physical_quantity - self.hard_committed
    }
}

/// Stock levels projection.
///
/// Consumes published `stock.ledger` envelopes and maintains per-product
/// totals across all storage units of a warehouse.
#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: WarehouseStore<ProductId, StockLevelReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> StockLevelsProjection<S>
where
    S: WarehouseStore<ProductId, StockLevelReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, warehouse_id: WarehouseId, product_id: &ProductId) -> Option<StockLevelReadModel> {
        self.store.get(warehouse_id, product_id)
    }

    pub fn list(&self, warehouse_id: WarehouseId) -> Vec<StockLevelReadModel> {
        self.store.list(warehouse_id)
    }

    /// Apply a published envelope into the projection.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        let warehouse_id = envelope.warehouse_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(warehouse_id, aggregate_id, seq)? {
            CursorCheck::Skip => return Ok(()),
            CursorCheck::Apply => {}
        }

        let event: StockLedgerEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        match &event {
            StockLedgerEvent::StockReceived(e) => {
                if e.warehouse_id != warehouse_id {
                    return Err(ProjectionError::WarehouseIsolation(
                        "event warehouse_id does not match envelope".to_string(),
                    ));
                }
                let mut rm = self.read_or_default(warehouse_id, e.product_id);
                rm.physical_quantity += e.quantity;
                self.store.upsert(warehouse_id, e.product_id, rm);
            }
            StockLedgerEvent::StockCommitted(e) => {
                let mut rm = self.read_or_default(warehouse_id, e.product_id);
                rm.hard_committed += e.quantity;
                self.store.upsert(warehouse_id, e.product_id, rm);
            }
            StockLedgerEvent::StockReleased(e) => {
                let mut rm = self.read_or_default(warehouse_id, e.product_id);
                rm.hard_committed = rm.hard_committed.saturating_sub(e.quantity);
                self.store.upsert(warehouse_id, e.product_id, rm);
            }
            StockLedgerEvent::LedgerOpened(_)
            | StockLedgerEvent::StorageUnitRegistered(_)
            | StockLedgerEvent::StorageUnitClaimed(_)
            | StockLedgerEvent::StorageUnitClaimReleased(_) => {}
        }

        self.cursors.advance(warehouse_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.cursors.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut warehouses = envs.iter().map(|e| e.warehouse_id()).collect::<Vec<_>>();
            warehouses.sort_by_key(|w| *w.as_uuid().as_bytes());
            warehouses.dedup();
            for w in warehouses {
                self.store.clear_warehouse(w);
            }
        }

        // Deterministic replay order: warehouse, aggregate, sequence.
        envs.sort_by_key(|e| {
            (
                *e.warehouse_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }

    fn read_or_default(&self, warehouse_id: WarehouseId, product_id: ProductId) -> StockLevelReadModel {
        self.store
            .get(warehouse_id, &product_id)
            .unwrap_or(StockLevelReadModel {
                product_id,
                physical_quantity: 0,
                hard_committed: 0,
            })
    }
}

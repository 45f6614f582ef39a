//! Available-To-Promise: the commitment tracker's display path.
//!
//! `atp = physical_available − Σ requested` over demand lines of documents
//! that still count as soft commitments (pending, not hard-allocated).
//!
//! These values are advisory: they serve the authoring UI while a user is
//! still typing quantities into a draft, and they may lag the write side by
//! a projection tick. The allocation engine never reads them — it
//! re-validates availability against the rehydrated ledger inside its own
//! locked sequence.

use packwave_core::WarehouseId;
use packwave_demand::DocumentId;
use packwave_products::ProductId;

use super::demand_documents::{DemandDocumentReadModel, DemandDocumentsProjection};
use super::stock_levels::{StockLevelReadModel, StockLevelsProjection};
use crate::read_model::WarehouseStore;

/// ATP figure for one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtpReadModel {
    pub product_id: ProductId,
    pub physical_quantity: u32,
    pub hard_committed: u32,
    pub soft_committed: u32,
}

impl AtpReadModel {
    pub fn physical_available(&self) -> u32 {
        self.physical_quantity - self.hard_committed
    }

    /// Available-to-promise; floored at zero when drafts over-demand.
    pub fn available_to_promise(&self) -> u32 {
        self.physical_available().saturating_sub(self.soft_committed)
    }
}

/// Commitment tracker view over the stock and demand read models.
#[derive(Debug)]
pub struct AtpView<SS, DS>
where
    SS: WarehouseStore<ProductId, StockLevelReadModel>,
    DS: WarehouseStore<DocumentId, DemandDocumentReadModel>,
{
    stock: std::sync::Arc<StockLevelsProjection<SS>>,
    demand: std::sync::Arc<DemandDocumentsProjection<DS>>,
}

impl<SS, DS> AtpView<SS, DS>
where
    SS: WarehouseStore<ProductId, StockLevelReadModel>,
    DS: WarehouseStore<DocumentId, DemandDocumentReadModel>,
{
    pub fn new(
        stock: std::sync::Arc<StockLevelsProjection<SS>>,
        demand: std::sync::Arc<DemandDocumentsProjection<DS>>,
    ) -> Self {
        Self { stock, demand }
    }

    /// ATP for one product.
    pub fn get(&self, warehouse_id: WarehouseId, product_id: ProductId) -> AtpReadModel {
        let level = self
            .stock
            .get(warehouse_id, &product_id)
            .unwrap_or(StockLevelReadModel {
                product_id,
                physical_quantity: 0,
                hard_committed: 0,
            });

        let soft_committed = self
            .demand
            .list(warehouse_id)
            .iter()
            .filter(|doc| doc.is_soft_commitment())
            .filter_map(|doc| doc.requested.get(&product_id))
            .sum();

        AtpReadModel {
            product_id,
            physical_quantity: level.physical_quantity,
            hard_committed: level.hard_committed,
            soft_committed,
        }
    }

    /// ATP for every product with stock or demand in the warehouse.
    pub fn list(&self, warehouse_id: WarehouseId) -> Vec<AtpReadModel> {
        let mut product_ids: Vec<ProductId> = self
            .stock
            .list(warehouse_id)
            .iter()
            .map(|l| l.product_id)
            .collect();
        for doc in self.demand.list(warehouse_id) {
            product_ids.extend(doc.requested.keys().copied());
        }
        product_ids.sort();
        product_ids.dedup();

        product_ids
            .into_iter()
            .map(|p| self.get(warehouse_id, p))
            .collect()
    }
}

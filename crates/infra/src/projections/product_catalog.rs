use serde_json::Value as JsonValue;

use packwave_core::WarehouseId;
use packwave_events::EventEnvelope;
use packwave_products::{ProductEvent, ProductId, ProductStatus};

use super::cursors::{CursorCheck, StreamCursors};
use super::ProjectionError;
use crate::read_model::WarehouseStore;

/// Queryable product catalog read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub barcode: Option<String>,
    pub status: ProductStatus,
}

/// Product catalog projection.
#[derive(Debug)]
pub struct ProductCatalogProjection<S>
where
    S: WarehouseStore<ProductId, ProductReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ProductCatalogProjection<S>
where
    S: WarehouseStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, warehouse_id: WarehouseId, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(warehouse_id, product_id)
    }

    pub fn list(&self, warehouse_id: WarehouseId) -> Vec<ProductReadModel> {
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

        let event: ProductEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        match &event {
            ProductEvent::ProductCreated(e) => {
                if e.warehouse_id != warehouse_id {
                    return Err(ProjectionError::WarehouseIsolation(
                        "event warehouse_id does not match envelope".to_string(),
                    ));
                }
                self.store.upsert(
                    warehouse_id,
                    e.product_id,
                    ProductReadModel {
                        product_id: e.product_id,
                        sku: e.sku.clone(),
                        name: e.name.clone(),
                        barcode: e.barcode.clone(),
                        status: ProductStatus::Active,
                    },
                );
            }
            ProductEvent::ProductArchived(e) => {
                if let Some(mut rm) = self.store.get(warehouse_id, &e.product_id) {
                    rm.status = ProductStatus::Archived;
                    self.store.upsert(warehouse_id, e.product_id, rm);
                }
            }
        }

        self.cursors.advance(warehouse_id, aggregate_id, seq);
        Ok(())
    }
}

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use packwave_core::{AggregateId, WarehouseId};
use packwave_demand::{DemandCategory, DemandDocumentEvent, DemandKind, DocumentId, DocumentStatus};
use packwave_events::EventEnvelope;
use packwave_products::ProductId;
use packwave_stock::StorageUnitId;

use super::cursors::{CursorCheck, StreamCursors};
use super::ProjectionError;
use crate::read_model::WarehouseStore;

/// Queryable demand document read model.
///
/// Feeds listing screens, clusterer eligibility and the ATP soft-commitment
/// sum. `requested` is per-product so the tracker can subtract exactly the
/// products a draft demands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemandDocumentReadModel {
    pub document_id: DocumentId,
    pub category: DemandCategory,
    pub kind: DemandKind,
    pub status: DocumentStatus,
    pub approved: bool,
    pub wave_id: Option<AggregateId>,
    pub requested: BTreeMap<ProductId, u32>,
    pub hard_allocated: BTreeMap<ProductId, u32>,
    pub storage_units: Vec<StorageUnitId>,
}

impl DemandDocumentReadModel {
    pub fn line_count(&self) -> u32 {
        match self.kind {
            DemandKind::Item => self.requested.len() as u32,
            DemandKind::StorageUnit => self.storage_units.len() as u32,
        }
    }

    pub fn total_requested(&self) -> u32 {
        self.requested.values().sum()
    }

    /// Canonical soft-commitment filter: pending (approved or not), not yet
    /// hard-allocated. Applied uniformly; nothing else computes this.
    pub fn is_soft_commitment(&self) -> bool {
        self.status == DocumentStatus::Pending
    }

    /// Eligible for wave clustering: approved, pending, unassigned.
    pub fn is_cluster_candidate(&self) -> bool {
        self.status == DocumentStatus::Pending && self.approved && self.wave_id.is_none()
    }
}

/// Demand documents projection.
#[derive(Debug)]
pub struct DemandDocumentsProjection<S>
where
    S: WarehouseStore<DocumentId, DemandDocumentReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> DemandDocumentsProjection<S>
where
    S: WarehouseStore<DocumentId, DemandDocumentReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(
        &self,
        warehouse_id: WarehouseId,
        document_id: &DocumentId,
    ) -> Option<DemandDocumentReadModel> {
        self.store.get(warehouse_id, document_id)
    }

    pub fn list(&self, warehouse_id: WarehouseId) -> Vec<DemandDocumentReadModel> {
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

        let event: DemandDocumentEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        match &event {
            DemandDocumentEvent::DocumentOpened {
                warehouse_id: event_warehouse,
                document_id,
                category,
                kind,
                ..
            } => {
                if *event_warehouse != warehouse_id {
                    return Err(ProjectionError::WarehouseIsolation(
                        "event warehouse_id does not match envelope".to_string(),
                    ));
                }
                self.store.upsert(
                    warehouse_id,
                    *document_id,
                    DemandDocumentReadModel {
                        document_id: *document_id,
                        category: *category,
                        kind: *kind,
                        status: DocumentStatus::Pending,
                        approved: false,
                        wave_id: None,
                        requested: BTreeMap::new(),
                        hard_allocated: BTreeMap::new(),
                        storage_units: Vec::new(),
                    },
                );
            }
            DemandDocumentEvent::LineAdded {
                document_id,
                product_id,
                requested_after,
                ..
            } => {
                self.update(warehouse_id, *document_id, |rm| {
                    rm.requested.insert(*product_id, *requested_after);
                });
            }
            DemandDocumentEvent::StorageUnitAdded {
                document_id,
                storage_unit_id,
                ..
            } => {
                self.update(warehouse_id, *document_id, |rm| {
                    rm.storage_units.push(*storage_unit_id);
                });
            }
            DemandDocumentEvent::DocumentApproved { document_id, .. } => {
                self.update(warehouse_id, *document_id, |rm| {
                    rm.approved = true;
                });
            }
            DemandDocumentEvent::AssignedToWave {
                document_id,
                wave_id,
                ..
            } => {
                self.update(warehouse_id, *document_id, |rm| {
                    rm.wave_id = Some(*wave_id);
                });
            }
            DemandDocumentEvent::UnassignedFromWave { document_id, .. } => {
                self.update(warehouse_id, *document_id, |rm| {
                    rm.wave_id = None;
                });
            }
            DemandDocumentEvent::AllocationRecorded {
                document_id,
                reservations,
                ..
            } => {
                self.update(warehouse_id, *document_id, |rm| {
                    rm.status = DocumentStatus::Allocated;
                    rm.hard_allocated.clear();
                    for r in reservations {
                        *rm.hard_allocated.entry(r.product_id).or_insert(0) += r.quantity;
                    }
                });
            }
            DemandDocumentEvent::AllocationReverted { document_id, .. } => {
                self.update(warehouse_id, *document_id, |rm| {
                    rm.status = DocumentStatus::Pending;
                    rm.approved = false;
                    rm.hard_allocated.clear();
                });
            }
            DemandDocumentEvent::DocumentCancelled { document_id, .. } => {
                self.update(warehouse_id, *document_id, |rm| {
                    rm.status = DocumentStatus::Cancelled;
                });
            }
            DemandDocumentEvent::DocumentPicked { document_id, .. } => {
                self.update(warehouse_id, *document_id, |rm| {
                    rm.status = DocumentStatus::Picked;
                });
            }
            DemandDocumentEvent::DocumentShipped { document_id, .. } => {
                self.update(warehouse_id, *document_id, |rm| {
                    rm.status = DocumentStatus::Shipped;
                });
            }
        }

        self.cursors.advance(warehouse_id, aggregate_id, seq);
        Ok(())
    }

    fn update(
        &self,
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        f: impl FnOnce(&mut DemandDocumentReadModel),
    ) {
        if let Some(mut rm) = self.store.get(warehouse_id, &document_id) {
            f(&mut rm);
            self.store.upsert(warehouse_id, document_id, rm);
        }
    }
}

use serde_json::Value as JsonValue;

use packwave_core::{AggregateId, WarehouseId};
use packwave_demand::DocumentId;
use packwave_events::EventEnvelope;
use packwave_waves::{WaveEvent, WaveId, WaveStats, WaveStatus};

use super::cursors::{CursorCheck, StreamCursors};
use super::ProjectionError;
use crate::read_model::WarehouseStore;

/// Queryable wave read model (planning screens).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveReadModel {
    pub wave_id: WaveId,
    pub status: WaveStatus,
    pub documents: Vec<DocumentId>,
    pub stats: WaveStats,
    pub job_ids: Vec<AggregateId>,
}

/// Waves projection.
#[derive(Debug)]
pub struct WavesProjection<S>
where
    S: WarehouseStore<WaveId, WaveReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> WavesProjection<S>
where
    S: WarehouseStore<WaveId, WaveReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, warehouse_id: WarehouseId, wave_id: &WaveId) -> Option<WaveReadModel> {
        self.store.get(warehouse_id, wave_id)
    }

    pub fn list(&self, warehouse_id: WarehouseId) -> Vec<WaveReadModel> {
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

        let event: WaveEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        match &event {
            WaveEvent::WaveOpened {
                warehouse_id: event_warehouse,
                wave_id,
                ..
            } => {
                if *event_warehouse != warehouse_id {
                    return Err(ProjectionError::WarehouseIsolation(
                        "event warehouse_id does not match envelope".to_string(),
                    ));
                }
                self.store.upsert(
                    warehouse_id,
                    *wave_id,
                    WaveReadModel {
                        wave_id: *wave_id,
                        status: WaveStatus::Planning,
                        documents: Vec::new(),
                        stats: WaveStats::default(),
                        job_ids: Vec::new(),
                    },
                );
            }
            WaveEvent::DocumentAdded {
                wave_id,
                document_id,
                line_count,
                total_quantity,
                ..
            } => {
                self.update(warehouse_id, *wave_id, |rm| {
                    rm.documents.push(*document_id);
                    rm.stats.document_count += 1;
                    rm.stats.total_lines += line_count;
                    rm.stats.total_quantity += total_quantity;
                });
            }
            WaveEvent::WaveReleased { wave_id, job_ids, .. } => {
                self.update(warehouse_id, *wave_id, |rm| {
                    rm.status = WaveStatus::Released;
                    rm.job_ids = job_ids.clone();
                });
            }
            WaveEvent::WaveCompleted { wave_id, .. } => {
                self.update(warehouse_id, *wave_id, |rm| {
                    rm.status = WaveStatus::Completed;
                });
            }
            WaveEvent::WaveCancelled { wave_id, .. } => {
                self.update(warehouse_id, *wave_id, |rm| {
                    rm.status = WaveStatus::Cancelled;
                });
            }
        }

        self.cursors.advance(warehouse_id, aggregate_id, seq);
        Ok(())
    }

    fn update(&self, warehouse_id: WarehouseId, wave_id: WaveId, f: impl FnOnce(&mut WaveReadModel)) {
        if let Some(mut rm) = self.store.get(warehouse_id, &wave_id) {
            f(&mut rm);
            self.store.upsert(warehouse_id, wave_id, rm);
        }
    }
}

use serde_json::Value as JsonValue;

use packwave_core::{UserId, WarehouseId};
use packwave_events::EventEnvelope;
use packwave_picking::{JobId, JobStatus, PickingJobEvent, PickingTask, TaskStatus};
use packwave_stock::{AllocationOrigin, Zone};

use super::cursors::{CursorCheck, StreamCursors};
use super::ProjectionError;
use crate::read_model::WarehouseStore;

/// Queryable picking job read model (picker-facing listings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickingJobReadModel {
    pub job_id: JobId,
    pub zone: Zone,
    pub origin: Option<AllocationOrigin>,
    pub status: JobStatus,
    pub picker: Option<UserId>,
    pub tasks: Vec<PickingTask>,
}

impl PickingJobReadModel {
    pub fn picked_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Picked)
            .count()
    }
}

/// Picking jobs projection.
#[derive(Debug)]
pub struct PickingJobsProjection<S>
where
    S: WarehouseStore<JobId, PickingJobReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> PickingJobsProjection<S>
where
    S: WarehouseStore<JobId, PickingJobReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, warehouse_id: WarehouseId, job_id: &JobId) -> Option<PickingJobReadModel> {
        self.store.get(warehouse_id, job_id)
    }

    pub fn list(&self, warehouse_id: WarehouseId) -> Vec<PickingJobReadModel> {
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

        let event: PickingJobEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        match &event {
            PickingJobEvent::JobOpened {
                warehouse_id: event_warehouse,
                job_id,
                zone,
                origin,
                tasks,
                ..
            } => {
                if *event_warehouse != warehouse_id {
                    return Err(ProjectionError::WarehouseIsolation(
                        "event warehouse_id does not match envelope".to_string(),
                    ));
                }
                self.store.upsert(
                    warehouse_id,
                    *job_id,
                    PickingJobReadModel {
                        job_id: *job_id,
                        zone: zone.clone(),
                        origin: Some(*origin),
                        status: JobStatus::Open,
                        picker: None,
                        tasks: tasks
                            .iter()
                            .map(|t| PickingTask {
                                task_id: t.task_id,
                                document_id: t.document_id,
                                storage_unit_id: t.storage_unit_id,
                                product_id: t.product_id,
                                quantity: t.quantity,
                                status: TaskStatus::Pending,
                            })
                            .collect(),
                    },
                );
            }
            PickingJobEvent::PickerAssigned { job_id, picker, .. } => {
                self.update(warehouse_id, *job_id, |rm| {
                    rm.picker = Some(*picker);
                });
            }
            PickingJobEvent::TaskPicked { job_id, task_id, .. } => {
                self.update(warehouse_id, *job_id, |rm| {
                    if let Some(task) = rm.tasks.iter_mut().find(|t| t.task_id == *task_id) {
                        task.status = TaskStatus::Picked;
                    }
                });
            }
            PickingJobEvent::JobCompleted { job_id, .. } => {
                self.update(warehouse_id, *job_id, |rm| {
                    rm.status = JobStatus::Completed;
                });
            }
            PickingJobEvent::JobCancelled { job_id, .. } => {
                self.update(warehouse_id, *job_id, |rm| {
                    rm.status = JobStatus::Cancelled;
                });
            }
        }

        self.cursors.advance(warehouse_id, aggregate_id, seq);
        Ok(())
    }

    fn update(
        &self,
        warehouse_id: WarehouseId,
        job_id: JobId,
        f: impl FnOnce(&mut PickingJobReadModel),
    ) {
        if let Some(mut rm) = self.store.get(warehouse_id, &job_id) {
            f(&mut rm);
            self.store.upsert(warehouse_id, job_id, rm);
        }
    }
}

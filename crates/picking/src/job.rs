use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use packwave_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId, WarehouseId};
use packwave_events::Event;
use packwave_products::ProductId;
use packwave_stock::{AllocationOrigin, StorageUnitId, Zone};

/// Picking job identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub AggregateId);

impl JobId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Picking task identifier (scoped to its job).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub AggregateId);

impl TaskId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TaskId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Task status: the only transition is Pending → Picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Picked,
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Open,
    Completed,
    Cancelled,
}

/// One unit of pick-work: take `quantity` of a product from one storage
/// unit. Immutable once created except for `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickingTask {
    pub task_id: TaskId,
    pub document_id: AggregateId,
    pub storage_unit_id: StorageUnitId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub status: TaskStatus,
}

/// Task payload at job creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: TaskId,
    pub document_id: AggregateId,
    pub storage_unit_id: StorageUnitId,
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Aggregate root: PickingJob.
///
/// Zone-scoped collection of picking tasks, assigned to at most one picker
/// at a time. Created only by the allocation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickingJob {
    id: JobId,
    warehouse_id: Option<WarehouseId>,
    zone: Zone,
    origin: Option<AllocationOrigin>,
    tasks: Vec<PickingTask>,
    picker: Option<UserId>,
    status: JobStatus,
    version: u64,
    created: bool,
}

impl PickingJob {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: JobId) -> Self {
        Self {
            id,
            warehouse_id: None,
            zone: Zone::new(""),
            origin: None,
            tasks: Vec::new(),
            picker: None,
            status: JobStatus::Open,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> JobId {
        self.id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    pub fn origin(&self) -> Option<AllocationOrigin> {
        self.origin
    }

    pub fn tasks(&self) -> &[PickingTask] {
        &self.tasks
    }

    pub fn picker(&self) -> Option<UserId> {
        self.picker
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn has_picked_tasks(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Picked)
    }

    pub fn pending_task_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .count()
    }
}

impl AggregateRoot for PickingJob {
    type Id = JobId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenJob (engine-only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenJob {
    pub warehouse_id: WarehouseId,
    pub job_id: JobId,
    pub zone: Zone,
    pub origin: AllocationOrigin,
    pub tasks: Vec<TaskSpec>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignPicker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignPicker {
    pub warehouse_id: WarehouseId,
    pub job_id: JobId,
    pub picker: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkTaskPicked — the picker-facing mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkTaskPicked {
    pub warehouse_id: WarehouseId,
    pub job_id: JobId,
    pub task_id: TaskId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelJob (engine-only; refused once anything is picked).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelJob {
    pub warehouse_id: WarehouseId,
    pub job_id: JobId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PickingJobCommand {
    OpenJob(OpenJob),
    AssignPicker(AssignPicker),
    MarkTaskPicked(MarkTaskPicked),
    CancelJob(CancelJob),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PickingJobEvent {
    JobOpened {
        warehouse_id: WarehouseId,
        job_id: JobId,
        zone: Zone,
        origin: AllocationOrigin,
        tasks: Vec<TaskSpec>,
        occurred_at: DateTime<Utc>,
    },
    PickerAssigned {
        warehouse_id: WarehouseId,
        job_id: JobId,
        picker: UserId,
        occurred_at: DateTime<Utc>,
    },
    TaskPicked {
        warehouse_id: WarehouseId,
        job_id: JobId,
        task_id: TaskId,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    JobCompleted {
        warehouse_id: WarehouseId,
        job_id: JobId,
        occurred_at: DateTime<Utc>,
    },
    JobCancelled {
        warehouse_id: WarehouseId,
        job_id: JobId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for PickingJobEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PickingJobEvent::JobOpened { .. } => "picking.job.opened",
            PickingJobEvent::PickerAssigned { .. } => "picking.job.picker_assigned",
            PickingJobEvent::TaskPicked { .. } => "picking.job.task_picked",
            PickingJobEvent::JobCompleted { .. } => "picking.job.completed",
            PickingJobEvent::JobCancelled { .. } => "picking.job.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PickingJobEvent::JobOpened { occurred_at, .. }
            | PickingJobEvent::PickerAssigned { occurred_at, .. }
            | PickingJobEvent::TaskPicked { occurred_at, .. }
            | PickingJobEvent::JobCompleted { occurred_at, .. }
            | PickingJobEvent::JobCancelled { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for PickingJob {
    type Command = PickingJobCommand;
    type Event = PickingJobEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PickingJobEvent::JobOpened {
                warehouse_id,
                job_id,
                zone,
                origin,
                tasks,
                ..
            } => {
                self.id = *job_id;
                self.warehouse_id = Some(*warehouse_id);
                self.zone = zone.clone();
                self.origin = Some(*origin);
                self.tasks = tasks
                    .iter()
                    .map(|t| PickingTask {
                        task_id: t.task_id,
                        document_id: t.document_id,
                        storage_unit_id: t.storage_unit_id,
                        product_id: t.product_id,
                        quantity: t.quantity,
                        status: TaskStatus::Pending,
                    })
                    .collect();
                self.status = JobStatus::Open;
                self.created = true;
            }
            PickingJobEvent::PickerAssigned { picker, .. } => {
                self.picker = Some(*picker);
            }
            PickingJobEvent::TaskPicked { task_id, .. } => {
                if let Some(task) = self.tasks.iter_mut().find(|t| t.task_id == *task_id) {
                    task.status = TaskStatus::Picked;
                }
            }
            PickingJobEvent::JobCompleted { .. } => {
                self.status = JobStatus::Completed;
            }
            PickingJobEvent::JobCancelled { .. } => {
                self.status = JobStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PickingJobCommand::OpenJob(cmd) => self.handle_open(cmd),
            PickingJobCommand::AssignPicker(cmd) => self.handle_assign_picker(cmd),
            PickingJobCommand::MarkTaskPicked(cmd) => self.handle_mark_task_picked(cmd),
            PickingJobCommand::CancelJob(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PickingJob {
    fn ensure_warehouse(&self, warehouse_id: WarehouseId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.warehouse_id != Some(warehouse_id) {
            return Err(DomainError::invariant("warehouse mismatch"));
        }
        Ok(())
    }

    fn ensure_job_id(&self, job_id: JobId) -> Result<(), DomainError> {
        if self.id != job_id {
            return Err(DomainError::invariant("job_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenJob) -> Result<Vec<PickingJobEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("job already exists"));
        }
        if cmd.tasks.is_empty() {
            return Err(DomainError::validation("job must have at least one task"));
        }
        if cmd.tasks.iter().any(|t| t.quantity == 0) {
            return Err(DomainError::validation("task quantity must be positive"));
        }

        Ok(vec![PickingJobEvent::JobOpened {
            warehouse_id: cmd.warehouse_id,
            job_id: cmd.job_id,
            zone: cmd.zone.clone(),
            origin: cmd.origin,
            tasks: cmd.tasks.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_assign_picker(&self, cmd: &AssignPicker) -> Result<Vec<PickingJobEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_job_id(cmd.job_id)?;

        if self.status != JobStatus::Open {
            return Err(DomainError::invariant("only open jobs can be assigned"));
        }

        Ok(vec![PickingJobEvent::PickerAssigned {
            warehouse_id: cmd.warehouse_id,
            job_id: cmd.job_id,
            picker: cmd.picker,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_mark_task_picked(
        &self,
        cmd: &MarkTaskPicked,
    ) -> Result<Vec<PickingJobEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_job_id(cmd.job_id)?;

        if self.status != JobStatus::Open {
            return Err(DomainError::invariant("job is not open"));
        }

        let task = self
            .tasks
            .iter()
            .find(|t| t.task_id == cmd.task_id)
            .ok_or_else(|| DomainError::not_found())?;
        if task.status == TaskStatus::Picked {
            return Err(DomainError::conflict("task already picked"));
        }

        let mut events = vec![PickingJobEvent::TaskPicked {
            warehouse_id: cmd.warehouse_id,
            job_id: cmd.job_id,
            task_id: cmd.task_id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        }];

        // Last pending task picked closes the job.
        if self.pending_task_count() == 1 {
            events.push(PickingJobEvent::JobCompleted {
                warehouse_id: cmd.warehouse_id,
                job_id: cmd.job_id,
                occurred_at: cmd.occurred_at,
            });
        }

        Ok(events)
    }

    fn handle_cancel(&self, cmd: &CancelJob) -> Result<Vec<PickingJobEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_job_id(cmd.job_id)?;

        if self.status != JobStatus::Open {
            return Err(DomainError::invariant("only open jobs can be cancelled"));
        }
        // Work already physically performed cannot be rolled back.
        if self.has_picked_tasks() {
            return Err(DomainError::invariant(
                "job has picked tasks and cannot be cancelled",
            ));
        }

        Ok(vec![PickingJobEvent::JobCancelled {
            warehouse_id: cmd.warehouse_id,
            job_id: cmd.job_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packwave_core::AggregateId;

    fn test_warehouse_id() -> WarehouseId {
        WarehouseId::new()
    }

    fn test_job_id() -> JobId {
        JobId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn task_spec() -> TaskSpec {
        TaskSpec {
            task_id: TaskId::new(AggregateId::new()),
            document_id: AggregateId::new(),
            storage_unit_id: StorageUnitId::new(AggregateId::new()),
            product_id: ProductId::new(AggregateId::new()),
            quantity: 2,
        }
    }

    fn apply_all(job: &mut PickingJob, events: Vec<PickingJobEvent>) {
        for e in &events {
            job.apply(e);
        }
    }

    fn open_job(tasks: Vec<TaskSpec>) -> PickingJob {
        let job_id = test_job_id();
        let mut job = PickingJob::empty(job_id);
        let events = job
            .handle(&PickingJobCommand::OpenJob(OpenJob {
                warehouse_id: test_warehouse_id(),
                job_id,
                zone: Zone::new("A"),
                origin: AllocationOrigin::Document {
                    document_id: AggregateId::new(),
                },
                tasks,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut job, events);
        job
    }

    #[test]
    fn open_job_requires_tasks() {
        let job_id = test_job_id();
        let job = PickingJob::empty(job_id);
        let err = job
            .handle(&PickingJobCommand::OpenJob(OpenJob {
                warehouse_id: test_warehouse_id(),
                job_id,
                zone: Zone::new("A"),
                origin: AllocationOrigin::Document {
                    document_id: AggregateId::new(),
                },
                tasks: vec![],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn picking_last_task_completes_job() {
        let t1 = task_spec();
        let t2 = task_spec();
        let mut job = open_job(vec![t1, t2]);
        let warehouse_id = job.warehouse_id().unwrap();

        let events = job
            .handle(&PickingJobCommand::MarkTaskPicked(MarkTaskPicked {
                warehouse_id,
                job_id: job.id_typed(),
                task_id: t1.task_id,
                actor: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events.len(), 1);
        apply_all(&mut job, events);
        assert_eq!(job.status(), JobStatus::Open);

        let events = job
            .handle(&PickingJobCommand::MarkTaskPicked(MarkTaskPicked {
                warehouse_id,
                job_id: job.id_typed(),
                task_id: t2.task_id,
                actor: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events.len(), 2);
        apply_all(&mut job, events);
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[test]
    fn task_cannot_be_picked_twice() {
        let t1 = task_spec();
        let t2 = task_spec();
        let mut job = open_job(vec![t1, t2]);
        let warehouse_id = job.warehouse_id().unwrap();

        let events = job
            .handle(&PickingJobCommand::MarkTaskPicked(MarkTaskPicked {
                warehouse_id,
                job_id: job.id_typed(),
                task_id: t1.task_id,
                actor: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut job, events);

        let err = job
            .handle(&PickingJobCommand::MarkTaskPicked(MarkTaskPicked {
                warehouse_id,
                job_id: job.id_typed(),
                task_id: t1.task_id,
                actor: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn cancel_refused_once_any_task_is_picked() {
        let t1 = task_spec();
        let t2 = task_spec();
        let mut job = open_job(vec![t1, t2]);
        let warehouse_id = job.warehouse_id().unwrap();

        let events = job
            .handle(&PickingJobCommand::MarkTaskPicked(MarkTaskPicked {
                warehouse_id,
                job_id: job.id_typed(),
                task_id: t1.task_id,
                actor: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut job, events);

        let err = job
            .handle(&PickingJobCommand::CancelJob(CancelJob {
                warehouse_id,
                job_id: job.id_typed(),
                reason: "wave cancelled".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn untouched_job_can_be_cancelled() {
        let mut job = open_job(vec![task_spec()]);
        let warehouse_id = job.warehouse_id().unwrap();

        let events = job
            .handle(&PickingJobCommand::CancelJob(CancelJob {
                warehouse_id,
                job_id: job.id_typed(),
                reason: "document cancelled".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut job, events);
        assert_eq!(job.status(), JobStatus::Cancelled);
    }

    #[test]
    fn assign_picker_only_while_open() {
        let mut job = open_job(vec![task_spec()]);
        let warehouse_id = job.warehouse_id().unwrap();
        let picker = UserId::new();

        let events = job
            .handle(&PickingJobCommand::AssignPicker(AssignPicker {
                warehouse_id,
                job_id: job.id_typed(),
                picker,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut job, events);
        assert_eq!(job.picker(), Some(picker));

        let events = job
            .handle(&PickingJobCommand::CancelJob(CancelJob {
                warehouse_id,
                job_id: job.id_typed(),
                reason: "test".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut job, events);

        let err = job
            .handle(&PickingJobCommand::AssignPicker(AssignPicker {
                warehouse_id,
                job_id: job.id_typed(),
                picker: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}

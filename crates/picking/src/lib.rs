//! `packwave-picking` — picking job domain.
//!
//! Jobs are created only by the allocation engine. The only externally
//! driven mutation is marking tasks picked (plus picker assignment).

pub mod job;

pub use job::{
    AssignPicker, CancelJob, JobId, MarkTaskPicked, OpenJob, PickingJob, PickingJobCommand,
    PickingJobEvent, PickingTask, JobStatus, TaskId, TaskSpec, TaskStatus,
};

//! The allocation engine: the sole writer of hard commitments.
//!
//! Every operation follows the same shape:
//!
//! 1. take the warehouse allocation lock (serializes allocate / release /
//!    cancel / pick-complete against each other in this process)
//! 2. load + rehydrate the aggregates involved (never read models)
//! 3. plan or validate purely, with zero side effects
//! 4. dispatch commands; all reservations of one operation ride in one
//!    ledger command, so the ledger append is the atomic commit point
//!
//! The ledger re-validates inside `handle` and the store's optimistic append
//! rejects interleaved writers, so even a bypassed lock degrades to a
//! `ConcurrentConflict`, never to oversell.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use packwave_core::{AggregateId, UserId, WarehouseId};
use packwave_demand::{
    AllocatedReservation, DemandDocument, DemandDocumentCommand, DocumentId, DocumentStatus,
    RecordAllocation, RevertAllocation, UnassignFromWave,
};
use packwave_events::{EventBus, EventEnvelope};
use packwave_infra::command_dispatcher::{CommandDispatcher, DispatchError};
use packwave_infra::event_store::EventStore;
use packwave_infra::repository::load_aggregate;
use packwave_picking::{
    CancelJob, JobId, JobStatus, MarkTaskPicked, OpenJob, PickingJob, PickingJobCommand, TaskId,
    TaskSpec,
};
use packwave_products::{Product, ProductId};
use packwave_stock::{
    AllocationOrigin, CommitReservations, LedgerId, ReleaseReservations, ReservationEntry,
    StockLedger, StockLedgerCommand, UnitClaim, Zone,
};
use packwave_waves::{Wave, WaveCommand, WaveId, WaveStatus};

use crate::error::{AllocationError, ShortageItem, ShortageReport};
use crate::planner::{LedgerPlanner, PlannedShortage};

/// Result of a successful (or idempotently repeated) allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationOutcome {
    pub document_id: DocumentId,
    pub job_ids: Vec<JobId>,
    pub reservations: Vec<AllocatedReservation>,
    /// True when the document was already allocated and the previously
    /// recorded outcome is returned unchanged.
    pub already_allocated: bool,
}

/// Result of a successful wave release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveReleaseOutcome {
    pub wave_id: WaveId,
    pub documents: Vec<DocumentId>,
    pub job_ids: Vec<JobId>,
}

/// What a document cancellation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelDocumentOutcome {
    /// The document was pending; it is now cancelled.
    Cancelled,
    /// The document was allocated; its commitments were released and it is
    /// pending again with approval revoked.
    RolledBackToPending,
}

/// Result of a wave cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveCancelOutcome {
    pub documents_unassigned: usize,
    pub documents_rolled_back: usize,
}

/// What completing one picking task triggered downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPickOutcome {
    pub job_completed: bool,
    pub document_picked: Option<DocumentId>,
    pub wave_completed: Option<WaveId>,
}

const LEDGER_TYPE: &str = "stock.ledger";
const DOCUMENT_TYPE: &str = "demand.document";
const WAVE_TYPE: &str = "waves.wave";
const JOB_TYPE: &str = "picking.job";

/// Allocation engine, wave releaser and lifecycle controller in one service.
pub struct AllocationEngine<S, B> {
    store: S,
    dispatcher: CommandDispatcher<S, B>,
    locks: Mutex<HashMap<WarehouseId, Arc<Mutex<()>>>>,
}

impl<S, B> AllocationEngine<S, B>
where
    S: EventStore + Clone,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store.clone(), bus),
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    /// Per-warehouse allocation lock. Held for the entire
    /// read-then-decide-then-write sequence of every engine operation.
    fn warehouse_lock(&self, warehouse_id: WarehouseId) -> Result<Arc<Mutex<()>>, AllocationError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| AllocationError::Internal("warehouse lock table poisoned".to_string()))?;
        Ok(locks.entry(warehouse_id).or_default().clone())
    }

    /// Convert an approved demand document's soft commitment into hard
    /// commitments, or fail atomically with a structured shortage report.
    pub fn allocate(
        &self,
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        actor: UserId,
    ) -> Result<AllocationOutcome, AllocationError> {
        let lock = self.warehouse_lock(warehouse_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| AllocationError::Internal("warehouse lock poisoned".to_string()))?;

        let document = self.load_document(warehouse_id, document_id)?;

        // Idempotency guard: re-invoking on an allocated document returns the
        // recorded outcome, never a duplicate allocation.
        if document.status() == DocumentStatus::Allocated {
            let recorded = document.allocation().ok_or_else(|| {
                AllocationError::Internal("allocated document without recorded allocation".into())
            })?;
            return Ok(AllocationOutcome {
                document_id,
                job_ids: recorded.job_ids.iter().copied().map(JobId::new).collect(),
                reservations: recorded.reservations.clone(),
                already_allocated: true,
            });
        }

        if document.status() != DocumentStatus::Pending {
            return Err(AllocationError::InvalidState(format!(
                "document is {:?}",
                document.status()
            )));
        }
        if !document.is_approved() {
            return Err(AllocationError::NotApproved);
        }
        // Wave members are released through the wave flow only.
        if document.wave_id().is_some() {
            return Err(AllocationError::DocumentInWave);
        }

        let ledger = self.load_ledger(warehouse_id)?;
        let mut planner = LedgerPlanner::new(&ledger);
        let plan = match planner.plan_document(&document)? {
            Ok(plan) => plan,
            Err(shortages) => {
                let report = self.resolve_shortages(warehouse_id, &shortages)?;
                info!(%warehouse_id, %document_id, "allocation short: {report}");
                return Err(AllocationError::Shortage(report));
            }
        };

        // Commit point: one ledger command, one atomic append.
        self.commit_to_ledger(
            warehouse_id,
            AllocationOrigin::Document {
                document_id: document_id.0,
            },
            plan.entries.clone(),
            plan.claims.clone(),
            actor,
        )?;

        let jobs = build_jobs(&ledger, &plan.entries)?;
        let job_ids = match self.open_jobs(
            warehouse_id,
            AllocationOrigin::Document {
                document_id: document_id.0,
            },
            &jobs,
        ) {
            Ok(ids) => ids,
            Err(e) => {
                self.compensate_release(
                    warehouse_id,
                    AllocationOrigin::Document {
                        document_id: document_id.0,
                    },
                    &plan.entries,
                    &plan.claims,
                    actor,
                );
                return Err(e);
            }
        };

        let reservations: Vec<AllocatedReservation> = plan
            .entries
            .iter()
            .map(|e| AllocatedReservation {
                storage_unit_id: e.storage_unit_id,
                product_id: e.product_id,
                quantity: e.quantity,
            })
            .collect();

        if let Err(e) = self.dispatch_document(
            warehouse_id,
            document_id,
            DemandDocumentCommand::RecordAllocation(RecordAllocation {
                warehouse_id,
                document_id,
                reservations: reservations.clone(),
                claimed_units: plan.claims.iter().map(|c| c.storage_unit_id).collect(),
                job_ids: job_ids.iter().map(|j| j.0).collect(),
                occurred_at: Utc::now(),
            }),
        ) {
            self.cancel_jobs_best_effort(warehouse_id, &job_ids, "allocation record failed");
            self.compensate_release(
                warehouse_id,
                AllocationOrigin::Document {
                    document_id: document_id.0,
                },
                &plan.entries,
                &plan.claims,
                actor,
            );
            return Err(map_dispatch(e));
        }

        info!(
            %warehouse_id, %document_id,
            jobs = job_ids.len(),
            reservations = reservations.len(),
            "document allocated"
        );

        Ok(AllocationOutcome {
            document_id,
            job_ids,
            reservations,
            already_allocated: false,
        })
    }

    /// Release a whole wave as a single unit: every member document planned
    /// against one shared snapshot, one atomic ledger commit, one picking
    /// job per zone across the wave.
    pub fn release_wave(
        &self,
        warehouse_id: WarehouseId,
        wave_id: WaveId,
        actor: UserId,
    ) -> Result<WaveReleaseOutcome, AllocationError> {
        let lock = self.warehouse_lock(warehouse_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| AllocationError::Internal("warehouse lock poisoned".to_string()))?;

        let wave = self.load_wave(warehouse_id, wave_id)?;
        if wave.status() != WaveStatus::Planning {
            return Err(AllocationError::InvalidState(format!(
                "wave is {:?}",
                wave.status()
            )));
        }

        let mut documents = Vec::with_capacity(wave.documents().len());
        for doc_id in wave.documents() {
            let document = self.load_document(warehouse_id, *doc_id)?;
            if document.status() != DocumentStatus::Pending || !document.is_approved() {
                return Err(AllocationError::InvalidState(format!(
                    "wave member {doc_id} is not an approved pending document"
                )));
            }
            if document.wave_id() != Some(wave_id.0) {
                return Err(AllocationError::InvalidState(format!(
                    "wave member {doc_id} is not assigned to this wave"
                )));
            }
            documents.push(document);
        }

        // Shared, consistent snapshot for the whole wave.
        let ledger = self.load_ledger(warehouse_id)?;
        let mut planner = LedgerPlanner::new(&ledger);
        let mut plans = Vec::with_capacity(documents.len());
        let mut shortages: Vec<PlannedShortage> = Vec::new();
        for document in &documents {
            match planner.plan_document(document)? {
                Ok(plan) => plans.push(plan),
                Err(short) => shortages.extend(short),
            }
        }

        if !shortages.is_empty() {
            // Aggregate per product across the wave's documents.
            let report = self.resolve_shortages(warehouse_id, &aggregate_shortages(shortages))?;
            info!(%warehouse_id, %wave_id, "wave release short: {report}");
            return Err(AllocationError::Shortage(report));
        }

        let all_entries: Vec<ReservationEntry> =
            plans.iter().flat_map(|p| p.entries.iter().copied()).collect();
        let all_claims: Vec<UnitClaim> =
            plans.iter().flat_map(|p| p.claims.iter().copied()).collect();

        let origin = AllocationOrigin::Wave { wave_id: wave_id.0 };
        self.commit_to_ledger(warehouse_id, origin, all_entries.clone(), all_claims.clone(), actor)?;

        // One job per zone, combining tasks of all member documents.
        let jobs = build_jobs(&ledger, &all_entries)?;
        let job_ids = match self.open_jobs(warehouse_id, origin, &jobs) {
            Ok(ids) => ids,
            Err(e) => {
                self.compensate_release(
                    warehouse_id,
                    AllocationOrigin::Wave { wave_id: wave_id.0 },
                    &all_entries,
                    &all_claims,
                    actor,
                );
                return Err(e);
            }
        };

        // Record per-document outcomes: each document keeps the jobs holding
        // its own tasks, and exactly its own reservations.
        let mut recorded = Vec::new();
        for (document, plan) in documents.iter().zip(&plans) {
            let document_id = document.id_typed();
            let doc_job_ids: Vec<AggregateId> = jobs
                .iter()
                .zip(&job_ids)
                .filter(|((_, tasks), _)| {
                    tasks.iter().any(|t| t.document_id == document_id.0)
                })
                .map(|(_, job_id)| job_id.0)
                .collect();

            let reservations: Vec<AllocatedReservation> = plan
                .entries
                .iter()
                .map(|e| AllocatedReservation {
                    storage_unit_id: e.storage_unit_id,
                    product_id: e.product_id,
                    quantity: e.quantity,
                })
                .collect();

            if let Err(e) = self.dispatch_document(
                warehouse_id,
                document_id,
                DemandDocumentCommand::RecordAllocation(RecordAllocation {
                    warehouse_id,
                    document_id,
                    reservations,
                    claimed_units: plan.claims.iter().map(|c| c.storage_unit_id).collect(),
                    job_ids: doc_job_ids,
                    occurred_at: Utc::now(),
                }),
            ) {
                // Unwind: revert already-recorded documents, drop jobs,
                // release the wave-wide commit.
                for done in &recorded {
                    self.revert_document_best_effort(warehouse_id, *done);
                }
                self.cancel_jobs_best_effort(warehouse_id, &job_ids, "wave release failed");
                self.compensate_release(
                    warehouse_id,
                    AllocationOrigin::Wave { wave_id: wave_id.0 },
                    &all_entries,
                    &all_claims,
                    actor,
                );
                return Err(map_dispatch(e));
            }
            recorded.push(document_id);
        }

        if let Err(e) = self.dispatch_wave(
            warehouse_id,
            wave_id,
            WaveCommand::MarkReleased(packwave_waves::MarkReleased {
                warehouse_id,
                wave_id,
                job_ids: job_ids.iter().map(|j| j.0).collect(),
                occurred_at: Utc::now(),
            }),
        ) {
            for done in &recorded {
                self.revert_document_best_effort(warehouse_id, *done);
            }
            self.cancel_jobs_best_effort(warehouse_id, &job_ids, "wave release failed");
            self.compensate_release(
                warehouse_id,
                AllocationOrigin::Wave { wave_id: wave_id.0 },
                &all_entries,
                &all_claims,
                actor,
            );
            return Err(map_dispatch(e));
        }

        info!(
            %warehouse_id, %wave_id,
            documents = recorded.len(),
            jobs = job_ids.len(),
            "wave released"
        );

        Ok(WaveReleaseOutcome {
            wave_id,
            documents: recorded,
            job_ids,
        })
    }

    /// Cancel a demand document.
    ///
    /// Pending documents are cancelled outright (nothing was committed).
    /// Allocated documents are rolled back: jobs cancelled (refused if any
    /// task was already picked), every committed quantity released, and the
    /// document returned to pending with approval revoked.
    pub fn cancel_document(
        &self,
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        reason: &str,
        actor: UserId,
    ) -> Result<CancelDocumentOutcome, AllocationError> {
        let lock = self.warehouse_lock(warehouse_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| AllocationError::Internal("warehouse lock poisoned".to_string()))?;

        let document = self.load_document(warehouse_id, document_id)?;

        match document.status() {
            DocumentStatus::Pending => {
                if document.wave_id().is_some() {
                    return Err(AllocationError::DocumentInWave);
                }
                self.dispatch_document(
                    warehouse_id,
                    document_id,
                    DemandDocumentCommand::CancelDocument(packwave_demand::CancelDocument {
                        warehouse_id,
                        document_id,
                        reason: reason.to_string(),
                        occurred_at: Utc::now(),
                    }),
                )
                .map_err(map_dispatch)?;
                info!(%warehouse_id, %document_id, "pending document cancelled");
                Ok(CancelDocumentOutcome::Cancelled)
            }
            DocumentStatus::Allocated => {
                if document.wave_id().is_some() {
                    return Err(AllocationError::DocumentInWave);
                }
                let recorded = document.allocation().ok_or_else(|| {
                    AllocationError::Internal(
                        "allocated document without recorded allocation".into(),
                    )
                })?;

                self.rollback_allocation(
                    warehouse_id,
                    document_id,
                    AllocationOrigin::Document {
                        document_id: document_id.0,
                    },
                    &recorded.job_ids.iter().copied().map(JobId::new).collect::<Vec<_>>(),
                    &recorded.reservations,
                    &recorded.claimed_units,
                    actor,
                    reason,
                )?;

                self.dispatch_document(
                    warehouse_id,
                    document_id,
                    DemandDocumentCommand::RevertAllocation(RevertAllocation {
                        warehouse_id,
                        document_id,
                        occurred_at: Utc::now(),
                    }),
                )
                .map_err(map_dispatch)?;

                info!(%warehouse_id, %document_id, "allocation rolled back");
                Ok(CancelDocumentOutcome::RolledBackToPending)
            }
            status => Err(AllocationError::InvalidState(format!(
                "document is {status:?}"
            ))),
        }
    }

    /// Cancel a wave.
    ///
    /// Planning: unassign members, nothing to roll back. Released: rejected
    /// if any task in the wave was picked; otherwise jobs are cancelled,
    /// all commitments released wave-wide, member documents reverted and
    /// unassigned.
    pub fn cancel_wave(
        &self,
        warehouse_id: WarehouseId,
        wave_id: WaveId,
        reason: &str,
        actor: UserId,
    ) -> Result<WaveCancelOutcome, AllocationError> {
        let lock = self.warehouse_lock(warehouse_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| AllocationError::Internal("warehouse lock poisoned".to_string()))?;

        let wave = self.load_wave(warehouse_id, wave_id)?;

        match wave.status() {
            WaveStatus::Planning => {
                for doc_id in wave.documents() {
                    self.dispatch_document(
                        warehouse_id,
                        *doc_id,
                        DemandDocumentCommand::UnassignFromWave(UnassignFromWave {
                            warehouse_id,
                            document_id: *doc_id,
                            wave_id: wave_id.0,
                            occurred_at: Utc::now(),
                        }),
                    )
                    .map_err(map_dispatch)?;
                }
                self.dispatch_wave(
                    warehouse_id,
                    wave_id,
                    WaveCommand::CancelWave(packwave_waves::CancelWave {
                        warehouse_id,
                        wave_id,
                        reason: reason.to_string(),
                        occurred_at: Utc::now(),
                    }),
                )
                .map_err(map_dispatch)?;

                info!(%warehouse_id, %wave_id, "planning wave cancelled");
                Ok(WaveCancelOutcome {
                    documents_unassigned: wave.documents().len(),
                    documents_rolled_back: 0,
                })
            }
            WaveStatus::Released => {
                // Reject before touching anything if physical work happened.
                for job_id in wave.job_ids() {
                    let job = self.load_job(warehouse_id, JobId::new(*job_id))?;
                    if job.has_picked_tasks() {
                        return Err(AllocationError::PickedWorkExists);
                    }
                }

                // Collect the exact rollback set from the documents' records.
                let mut entries: Vec<ReservationEntry> = Vec::new();
                let mut claims: Vec<UnitClaim> = Vec::new();
                let mut members = Vec::new();
                for doc_id in wave.documents() {
                    let document = self.load_document(warehouse_id, *doc_id)?;
                    if document.status() != DocumentStatus::Allocated {
                        return Err(AllocationError::InvalidState(format!(
                            "wave member {doc_id} is not allocated"
                        )));
                    }
                    let recorded = document.allocation().ok_or_else(|| {
                        AllocationError::Internal(
                            "allocated document without recorded allocation".into(),
                        )
                    })?;
                    entries.extend(recorded.reservations.iter().map(|r| ReservationEntry {
                        document_id: doc_id.0,
                        storage_unit_id: r.storage_unit_id,
                        product_id: r.product_id,
                        quantity: r.quantity,
                    }));
                    claims.extend(recorded.claimed_units.iter().map(|u| UnitClaim {
                        storage_unit_id: *u,
                        document_id: doc_id.0,
                    }));
                    members.push(*doc_id);
                }

                for job_id in wave.job_ids() {
                    self.dispatch_job(
                        warehouse_id,
                        JobId::new(*job_id),
                        PickingJobCommand::CancelJob(CancelJob {
                            warehouse_id,
                            job_id: JobId::new(*job_id),
                            reason: reason.to_string(),
                            occurred_at: Utc::now(),
                        }),
                    )
                    .map_err(map_cancel_job)?;
                }

                // One atomic release for the whole wave.
                self.release_from_ledger(
                    warehouse_id,
                    AllocationOrigin::Wave { wave_id: wave_id.0 },
                    entries,
                    claims,
                    actor,
                )?;

                for doc_id in &members {
                    self.dispatch_document(
                        warehouse_id,
                        *doc_id,
                        DemandDocumentCommand::RevertAllocation(RevertAllocation {
                            warehouse_id,
                            document_id: *doc_id,
                            occurred_at: Utc::now(),
                        }),
                    )
                    .map_err(map_dispatch)?;
                    self.dispatch_document(
                        warehouse_id,
                        *doc_id,
                        DemandDocumentCommand::UnassignFromWave(UnassignFromWave {
                            warehouse_id,
                            document_id: *doc_id,
                            wave_id: wave_id.0,
                            occurred_at: Utc::now(),
                        }),
                    )
                    .map_err(map_dispatch)?;
                }

                self.dispatch_wave(
                    warehouse_id,
                    wave_id,
                    WaveCommand::CancelWave(packwave_waves::CancelWave {
                        warehouse_id,
                        wave_id,
                        reason: reason.to_string(),
                        occurred_at: Utc::now(),
                    }),
                )
                .map_err(map_dispatch)?;

                info!(%warehouse_id, %wave_id, members = members.len(), "released wave cancelled");
                Ok(WaveCancelOutcome {
                    documents_unassigned: members.len(),
                    documents_rolled_back: members.len(),
                })
            }
            status => Err(AllocationError::InvalidState(format!("wave is {status:?}"))),
        }
    }

    /// Create a wave from eligible documents (approved, pending, unassigned).
    pub fn create_wave(
        &self,
        warehouse_id: WarehouseId,
        document_ids: &[DocumentId],
    ) -> Result<WaveId, AllocationError> {
        if document_ids.is_empty() {
            return Err(AllocationError::InvalidState("wave needs documents".to_string()));
        }

        let lock = self.warehouse_lock(warehouse_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| AllocationError::Internal("warehouse lock poisoned".to_string()))?;

        // Validate every member before creating anything.
        let mut documents = Vec::with_capacity(document_ids.len());
        for doc_id in document_ids {
            let document = self.load_document(warehouse_id, *doc_id)?;
            if document.status() != DocumentStatus::Pending || !document.is_approved() {
                return Err(AllocationError::InvalidState(format!(
                    "document {doc_id} is not an approved pending document"
                )));
            }
            if document.wave_id().is_some() {
                return Err(AllocationError::DocumentInWave);
            }
            documents.push(document);
        }

        let wave_id = WaveId::new(AggregateId::new());
        self.dispatch_wave(
            warehouse_id,
            wave_id,
            WaveCommand::OpenWave(packwave_waves::OpenWave {
                warehouse_id,
                wave_id,
                occurred_at: Utc::now(),
            }),
        )
        .map_err(map_dispatch)?;

        for document in &documents {
            let document_id = document.id_typed();
            self.dispatch_document(
                warehouse_id,
                document_id,
                DemandDocumentCommand::AssignToWave(packwave_demand::AssignToWave {
                    warehouse_id,
                    document_id,
                    wave_id: wave_id.0,
                    occurred_at: Utc::now(),
                }),
            )
            .map_err(map_dispatch)?;
            self.dispatch_wave(
                warehouse_id,
                wave_id,
                WaveCommand::AddDocument(packwave_waves::AddDocument {
                    warehouse_id,
                    wave_id,
                    document_id,
                    line_count: document.body().line_count() as u32,
                    total_quantity: document.body().total_requested(),
                    occurred_at: Utc::now(),
                }),
            )
            .map_err(map_dispatch)?;
        }

        info!(%warehouse_id, %wave_id, documents = documents.len(), "wave created");
        Ok(wave_id)
    }

    /// Mark one picking task picked, advancing the document (and wave) when
    /// their pick-work finishes. Runs under the warehouse lock so it cannot
    /// interleave with a cancellation's picked-task check.
    pub fn mark_task_picked(
        &self,
        warehouse_id: WarehouseId,
        job_id: JobId,
        task_id: TaskId,
        actor: UserId,
    ) -> Result<TaskPickOutcome, AllocationError> {
        let lock = self.warehouse_lock(warehouse_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| AllocationError::Internal("warehouse lock poisoned".to_string()))?;

        self.dispatch_job(
            warehouse_id,
            job_id,
            PickingJobCommand::MarkTaskPicked(MarkTaskPicked {
                warehouse_id,
                job_id,
                task_id,
                actor,
                occurred_at: Utc::now(),
            }),
        )
        .map_err(map_dispatch)?;

        let job = self.load_job(warehouse_id, job_id)?;
        let job_completed = job.status() == JobStatus::Completed;

        let task = job
            .tasks()
            .iter()
            .find(|t| t.task_id == task_id)
            .copied()
            .ok_or_else(|| AllocationError::Internal("picked task missing from job".into()))?;

        // Document advance: picked once every one of its tasks, across all
        // jobs of its allocation, is picked.
        let document_id = DocumentId::new(task.document_id);
        let document = self.load_document(warehouse_id, document_id)?;
        let mut document_picked = None;
        if document.status() == DocumentStatus::Allocated {
            if let Some(recorded) = document.allocation() {
                let mut all_picked = true;
                for doc_job_id in &recorded.job_ids {
                    let doc_job = self.load_job(warehouse_id, JobId::new(*doc_job_id))?;
                    let pending = doc_job.tasks().iter().any(|t| {
                        t.document_id == document_id.0
                            && t.status == packwave_picking::TaskStatus::Pending
                    });
                    if pending {
                        all_picked = false;
                        break;
                    }
                }
                if all_picked {
                    self.dispatch_document(
                        warehouse_id,
                        document_id,
                        DemandDocumentCommand::MarkPicked(packwave_demand::MarkPicked {
                            warehouse_id,
                            document_id,
                            occurred_at: Utc::now(),
                        }),
                    )
                    .map_err(map_dispatch)?;
                    document_picked = Some(document_id);
                }
            }
        }

        // Wave advance: completed once every job of the wave is completed.
        let mut wave_completed = None;
        if let Some(AllocationOrigin::Wave { wave_id }) = job.origin() {
            let wave_id = WaveId::new(wave_id);
            let wave = self.load_wave(warehouse_id, wave_id)?;
            if wave.status() == WaveStatus::Released {
                let mut all_done = true;
                for wave_job_id in wave.job_ids() {
                    let wave_job = self.load_job(warehouse_id, JobId::new(*wave_job_id))?;
                    if wave_job.status() != JobStatus::Completed {
                        all_done = false;
                        break;
                    }
                }
                if all_done {
                    self.dispatch_wave(
                        warehouse_id,
                        wave_id,
                        WaveCommand::MarkCompleted(packwave_waves::MarkCompleted {
                            warehouse_id,
                            wave_id,
                            occurred_at: Utc::now(),
                        }),
                    )
                    .map_err(map_dispatch)?;
                    wave_completed = Some(wave_id);
                }
            }
        }

        Ok(TaskPickOutcome {
            job_completed,
            document_picked,
            wave_completed,
        })
    }

    // ---- internals -------------------------------------------------------

    fn load_ledger(&self, warehouse_id: WarehouseId) -> Result<StockLedger, AllocationError> {
        let ledger_id = LedgerId::for_warehouse(warehouse_id);
        let (ledger, _) = load_aggregate(&self.store, warehouse_id, ledger_id.0, |_, id| {
            StockLedger::empty(LedgerId::new(id))
        })
        .map_err(map_dispatch)?;
        if !ledger.is_open() {
            return Err(AllocationError::InvalidState(
                "stock ledger not open for this warehouse".to_string(),
            ));
        }
        Ok(ledger)
    }

    fn load_document(
        &self,
        warehouse_id: WarehouseId,
        document_id: DocumentId,
    ) -> Result<DemandDocument, AllocationError> {
        let (document, _) = load_aggregate(&self.store, warehouse_id, document_id.0, |_, id| {
            DemandDocument::empty(DocumentId::new(id))
        })
        .map_err(map_dispatch)?;
        if !document.exists() {
            return Err(AllocationError::DocumentNotFound);
        }
        Ok(document)
    }

    fn load_wave(&self, warehouse_id: WarehouseId, wave_id: WaveId) -> Result<Wave, AllocationError> {
        let (wave, _) = load_aggregate(&self.store, warehouse_id, wave_id.0, |_, id| {
            Wave::empty(WaveId::new(id))
        })
        .map_err(map_dispatch)?;
        if !wave.exists() {
            return Err(AllocationError::WaveNotFound);
        }
        Ok(wave)
    }

    fn load_job(&self, warehouse_id: WarehouseId, job_id: JobId) -> Result<PickingJob, AllocationError> {
        let (job, _) = load_aggregate(&self.store, warehouse_id, job_id.0, |_, id| {
            PickingJob::empty(JobId::new(id))
        })
        .map_err(map_dispatch)?;
        if !job.exists() {
            return Err(AllocationError::Internal(format!("job {job_id} not found")));
        }
        Ok(job)
    }

    fn commit_to_ledger(
        &self,
        warehouse_id: WarehouseId,
        origin: AllocationOrigin,
        entries: Vec<ReservationEntry>,
        claims: Vec<UnitClaim>,
        actor: UserId,
    ) -> Result<(), AllocationError> {
        let ledger_id = LedgerId::for_warehouse(warehouse_id);
        self.dispatcher
            .dispatch::<StockLedger>(
                warehouse_id,
                ledger_id.0,
                LEDGER_TYPE,
                StockLedgerCommand::CommitReservations(CommitReservations {
                    warehouse_id,
                    ledger_id,
                    origin,
                    entries,
                    claims,
                    actor,
                    occurred_at: Utc::now(),
                }),
                |_, id| StockLedger::empty(LedgerId::new(id)),
            )
            .map(|_| ())
            .map_err(map_commit)
    }

    fn release_from_ledger(
        &self,
        warehouse_id: WarehouseId,
        origin: AllocationOrigin,
        entries: Vec<ReservationEntry>,
        claim_releases: Vec<UnitClaim>,
        actor: UserId,
    ) -> Result<(), AllocationError> {
        let ledger_id = LedgerId::for_warehouse(warehouse_id);
        self.dispatcher
            .dispatch::<StockLedger>(
                warehouse_id,
                ledger_id.0,
                LEDGER_TYPE,
                StockLedgerCommand::ReleaseReservations(ReleaseReservations {
                    warehouse_id,
                    ledger_id,
                    origin,
                    entries,
                    claim_releases,
                    actor,
                    occurred_at: Utc::now(),
                }),
                |_, id| StockLedger::empty(LedgerId::new(id)),
            )
            .map(|_| ())
            .map_err(map_release)
    }

    fn open_jobs(
        &self,
        warehouse_id: WarehouseId,
        origin: AllocationOrigin,
        jobs: &[(Zone, Vec<TaskSpec>)],
    ) -> Result<Vec<JobId>, AllocationError> {
        let mut job_ids = Vec::with_capacity(jobs.len());
        for (zone, tasks) in jobs {
            let job_id = JobId::new(AggregateId::new());
            if let Err(e) = self.dispatch_job(
                warehouse_id,
                job_id,
                PickingJobCommand::OpenJob(OpenJob {
                    warehouse_id,
                    job_id,
                    zone: zone.clone(),
                    origin,
                    tasks: tasks.clone(),
                    occurred_at: Utc::now(),
                }),
            ) {
                self.cancel_jobs_best_effort(warehouse_id, &job_ids, "sibling job failed to open");
                return Err(map_dispatch(e));
            }
            job_ids.push(job_id);
        }
        Ok(job_ids)
    }

    fn rollback_allocation(
        &self,
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        origin: AllocationOrigin,
        job_ids: &[JobId],
        reservations: &[AllocatedReservation],
        claimed_units: &[packwave_stock::StorageUnitId],
        actor: UserId,
        reason: &str,
    ) -> Result<(), AllocationError> {
        // Check every job first: a single picked task blocks the rollback.
        for job_id in job_ids {
            let job = self.load_job(warehouse_id, *job_id)?;
            if job.has_picked_tasks() {
                return Err(AllocationError::PickedWorkExists);
            }
        }
        for job_id in job_ids {
            self.dispatch_job(
                warehouse_id,
                *job_id,
                PickingJobCommand::CancelJob(CancelJob {
                    warehouse_id,
                    job_id: *job_id,
                    reason: reason.to_string(),
                    occurred_at: Utc::now(),
                }),
            )
            .map_err(map_cancel_job)?;
        }

        let entries: Vec<ReservationEntry> = reservations
            .iter()
            .map(|r| ReservationEntry {
                document_id: document_id.0,
                storage_unit_id: r.storage_unit_id,
                product_id: r.product_id,
                quantity: r.quantity,
            })
            .collect();
        let claims: Vec<UnitClaim> = claimed_units
            .iter()
            .map(|u| UnitClaim {
                storage_unit_id: *u,
                document_id: document_id.0,
            })
            .collect();

        self.release_from_ledger(warehouse_id, origin, entries, claims, actor)
    }

    /// Resolve product identity for a shortage report via the product
    /// catalog streams (authoritative, not the read model).
    fn resolve_shortages(
        &self,
        warehouse_id: WarehouseId,
        shortages: &[PlannedShortage],
    ) -> Result<ShortageReport, AllocationError> {
        let mut items = Vec::with_capacity(shortages.len());
        for s in shortages {
            let (product, _) = load_aggregate(&self.store, warehouse_id, s.product_id.0, |_, id| {
                Product::empty(ProductId::new(id))
            })
            .map_err(map_dispatch)?;
            let (sku, name) = if product.warehouse_id().is_some() {
                (product.sku().to_string(), product.name().to_string())
            } else {
                ("unknown".to_string(), "unknown product".to_string())
            };
            items.push(ShortageItem {
                product_id: s.product_id,
                sku,
                name,
                needed: s.needed,
                available: s.available,
                missing: s.missing,
            });
        }
        Ok(ShortageReport { items })
    }

    fn compensate_release(
        &self,
        warehouse_id: WarehouseId,
        origin: AllocationOrigin,
        entries: &[ReservationEntry],
        claims: &[UnitClaim],
        actor: UserId,
    ) {
        let result = self.release_from_ledger(
            warehouse_id,
            origin,
            entries.to_vec(),
            claims.to_vec(),
            actor,
        );
        if let Err(e) = result {
            // The commit stands in the ledger but nothing references it.
            // Loud log; the audit trail has the full picture.
            warn!(%warehouse_id, error = %e, "compensating release failed");
        }
    }

    fn revert_document_best_effort(&self, warehouse_id: WarehouseId, document_id: DocumentId) {
        let result = self.dispatch_document(
            warehouse_id,
            document_id,
            DemandDocumentCommand::RevertAllocation(RevertAllocation {
                warehouse_id,
                document_id,
                occurred_at: Utc::now(),
            }),
        );
        if let Err(e) = result {
            warn!(%warehouse_id, %document_id, error = ?e, "document revert failed");
        }
    }

    fn cancel_jobs_best_effort(&self, warehouse_id: WarehouseId, job_ids: &[JobId], reason: &str) {
        for job_id in job_ids {
            let result = self.dispatch_job(
                warehouse_id,
                *job_id,
                PickingJobCommand::CancelJob(CancelJob {
                    warehouse_id,
                    job_id: *job_id,
                    reason: reason.to_string(),
                    occurred_at: Utc::now(),
                }),
            );
            if let Err(e) = result {
                warn!(%warehouse_id, %job_id, error = ?e, "job cancel failed");
            }
        }
    }

    fn dispatch_document(
        &self,
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        command: DemandDocumentCommand,
    ) -> Result<(), DispatchError> {
        self.dispatcher
            .dispatch::<DemandDocument>(warehouse_id, document_id.0, DOCUMENT_TYPE, command, |_, id| {
                DemandDocument::empty(DocumentId::new(id))
            })
            .map(|_| ())
    }

    fn dispatch_wave(
        &self,
        warehouse_id: WarehouseId,
        wave_id: WaveId,
        command: WaveCommand,
    ) -> Result<(), DispatchError> {
        self.dispatcher
            .dispatch::<Wave>(warehouse_id, wave_id.0, WAVE_TYPE, command, |_, id| {
                Wave::empty(WaveId::new(id))
            })
            .map(|_| ())
    }

    fn dispatch_job(
        &self,
        warehouse_id: WarehouseId,
        job_id: JobId,
        command: PickingJobCommand,
    ) -> Result<(), DispatchError> {
        self.dispatcher
            .dispatch::<PickingJob>(warehouse_id, job_id.0, JOB_TYPE, command, |_, id| {
                PickingJob::empty(JobId::new(id))
            })
            .map(|_| ())
    }
}

/// Group reservation entries by the zone of their storage unit: one picking
/// job per zone, tasks for the same zone combined regardless of document.
fn build_jobs(
    ledger: &StockLedger,
    entries: &[ReservationEntry],
) -> Result<Vec<(Zone, Vec<TaskSpec>)>, AllocationError> {
    let mut by_zone: BTreeMap<Zone, Vec<TaskSpec>> = BTreeMap::new();
    for entry in entries {
        let unit = ledger.unit(entry.storage_unit_id).ok_or_else(|| {
            AllocationError::Internal(format!(
                "planned entry references unknown unit {}",
                entry.storage_unit_id
            ))
        })?;
        by_zone.entry(unit.zone.clone()).or_default().push(TaskSpec {
            task_id: TaskId::new(AggregateId::new()),
            document_id: entry.document_id,
            storage_unit_id: entry.storage_unit_id,
            product_id: entry.product_id,
            quantity: entry.quantity,
        });
    }
    Ok(by_zone.into_iter().collect())
}

/// Merge per-document shortages into per-product totals for a wave report.
fn aggregate_shortages(shortages: Vec<PlannedShortage>) -> Vec<PlannedShortage> {
    let mut merged: BTreeMap<ProductId, PlannedShortage> = BTreeMap::new();
    for s in shortages {
        merged
            .entry(s.product_id)
            .and_modify(|m| {
                m.needed += s.needed;
                m.available += s.available;
                m.missing += s.missing;
            })
            .or_insert(s);
    }
    merged.into_values().collect()
}

fn map_dispatch(e: DispatchError) -> AllocationError {
    match e {
        DispatchError::Concurrency(msg) => AllocationError::ConcurrentConflict(msg),
        DispatchError::NotFound => AllocationError::InvalidState("not found".to_string()),
        DispatchError::Validation(msg) | DispatchError::InvariantViolation(msg) => {
            AllocationError::InvalidState(msg)
        }
        other => AllocationError::Internal(format!("{other:?}")),
    }
}

/// Commit-specific mapping: an invariant rejection here means the ledger
/// found less stock than planning did — a concurrent writer got in between.
fn map_commit(e: DispatchError) -> AllocationError {
    match e {
        DispatchError::Concurrency(msg) => AllocationError::ConcurrentConflict(msg),
        DispatchError::InvariantViolation(msg) => AllocationError::InsufficientPhysicalStock(msg),
        other => map_dispatch(other),
    }
}

/// Release-specific mapping: an invariant rejection here is an over-release,
/// a rollback bug. Abort loudly.
fn map_release(e: DispatchError) -> AllocationError {
    match e {
        DispatchError::Concurrency(msg) => AllocationError::ConcurrentConflict(msg),
        DispatchError::InvariantViolation(msg) => AllocationError::OverRelease(msg),
        other => map_dispatch(other),
    }
}

/// A job cancel rejected for picked tasks surfaces as `PickedWorkExists`
/// (the pick landed between our check and the cancel).
fn map_cancel_job(e: DispatchError) -> AllocationError {
    match e {
        DispatchError::InvariantViolation(_) => AllocationError::PickedWorkExists,
        other => map_dispatch(other),
    }
}

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use packwave_core::{Aggregate, AggregateId, AggregateRoot, DomainError, WarehouseId};
use packwave_events::Event;
use packwave_products::ProductId;
use packwave_stock::StorageUnitId;

/// Demand document identifier (warehouse-scoped via `warehouse_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub AggregateId);

impl DocumentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Business flavor of a demand document. Both flavors share one lifecycle;
/// the distinction is display/reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemandCategory {
    Order,
    Transfer,
}

/// Demand granularity, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemandKind {
    /// Item-level lines: (product, quantity) pairs filled from any storage unit.
    Item,
    /// Whole-storage-unit lines: specific units picked as a whole.
    StorageUnit,
}

/// One item-level demand line. `hard_allocated` stays 0 until the allocation
/// engine records a successful allocation, keeping partial history auditable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandLine {
    pub product_id: ProductId,
    pub requested: u32,
    pub hard_allocated: u32,
}

/// Tagged-union document body — no stringly-typed `kind` with nullable
/// fields; the allocation engine matches on this exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DemandBody {
    Items { lines: Vec<DemandLine> },
    StorageUnits { units: Vec<StorageUnitId> },
}

impl DemandBody {
    pub fn is_empty(&self) -> bool {
        match self {
            DemandBody::Items { lines } => lines.is_empty(),
            DemandBody::StorageUnits { units } => units.is_empty(),
        }
    }

    pub fn line_count(&self) -> usize {
        match self {
            DemandBody::Items { lines } => lines.len(),
            DemandBody::StorageUnits { units } => units.len(),
        }
    }

    pub fn total_requested(&self) -> u32 {
        match self {
            DemandBody::Items { lines } => lines.iter().map(|l| l.requested).sum(),
            DemandBody::StorageUnits { .. } => 0,
        }
    }
}

/// Document lifecycle status. Approval is a separate gate on `Pending`, not
/// a status of its own: cancellation of an allocated document returns it to
/// `Pending` with approval revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Allocated,
    Picked,
    Shipped,
    Cancelled,
}

/// One reservation recorded against this document by a successful allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedReservation {
    pub storage_unit_id: StorageUnitId,
    pub product_id: ProductId,
    pub quantity: u32,
}

/// The outcome of a successful allocation, kept on the document so that
/// re-invoking allocation is an idempotent no-op and rollback releases the
/// exact quantities that were committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedAllocation {
    pub reservations: Vec<AllocatedReservation>,
    pub claimed_units: Vec<StorageUnitId>,
    pub job_ids: Vec<AggregateId>,
}

/// Aggregate root: DemandDocument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemandDocument {
    id: DocumentId,
    warehouse_id: Option<WarehouseId>,
    category: DemandCategory,
    body: DemandBody,
    status: DocumentStatus,
    approved: bool,
    wave_id: Option<AggregateId>,
    allocation: Option<RecordedAllocation>,
    version: u64,
    created: bool,
}

impl DemandDocument {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: DocumentId) -> Self {
        Self {
            id,
            warehouse_id: None,
            category: DemandCategory::Order,
            body: DemandBody::Items { lines: Vec::new() },
            status: DocumentStatus::Pending,
            approved: false,
            wave_id: None,
            allocation: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DocumentId {
        self.id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn category(&self) -> DemandCategory {
        self.category
    }

    pub fn body(&self) -> &DemandBody {
        &self.body
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn is_approved(&self) -> bool {
        self.approved
    }

    pub fn wave_id(&self) -> Option<AggregateId> {
        self.wave_id
    }

    pub fn allocation(&self) -> Option<&RecordedAllocation> {
        self.allocation.as_ref()
    }

    /// Distinct products this document demands (clustering input).
    pub fn product_set(&self) -> BTreeSet<ProductId> {
        match &self.body {
            DemandBody::Items { lines } => lines.iter().map(|l| l.product_id).collect(),
            DemandBody::StorageUnits { .. } => BTreeSet::new(),
        }
    }

    /// True while the document's demand still counts as a soft commitment:
    /// pending (approved or not) and not hard-allocated.
    pub fn is_soft_commitment(&self) -> bool {
        self.created && self.status == DocumentStatus::Pending
    }
}

impl AggregateRoot for DemandDocument {
    type Id = DocumentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenDocument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDocument {
    pub warehouse_id: WarehouseId,
    pub document_id: DocumentId,
    pub category: DemandCategory,
    pub kind: DemandKind,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine (item-kind documents only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub warehouse_id: WarehouseId,
    pub document_id: DocumentId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddStorageUnit (storage-unit-kind documents only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddStorageUnit {
    pub warehouse_id: WarehouseId,
    pub document_id: DocumentId,
    pub storage_unit_id: StorageUnitId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveDocument (gates allocation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveDocument {
    pub warehouse_id: WarehouseId,
    pub document_id: DocumentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignToWave (exclusive membership while the wave is open).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignToWave {
    pub warehouse_id: WarehouseId,
    pub document_id: DocumentId,
    pub wave_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UnassignFromWave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnassignFromWave {
    pub warehouse_id: WarehouseId,
    pub document_id: DocumentId,
    pub wave_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordAllocation (engine-only; documents never self-allocate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAllocation {
    pub warehouse_id: WarehouseId,
    pub document_id: DocumentId,
    pub reservations: Vec<AllocatedReservation>,
    pub claimed_units: Vec<StorageUnitId>,
    pub job_ids: Vec<AggregateId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RevertAllocation (engine-only; rollback path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertAllocation {
    pub warehouse_id: WarehouseId,
    pub document_id: DocumentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelDocument (pending documents only; nothing to roll back).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelDocument {
    pub warehouse_id: WarehouseId,
    pub document_id: DocumentId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkPicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPicked {
    pub warehouse_id: WarehouseId,
    pub document_id: DocumentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkShipped {
    pub warehouse_id: WarehouseId,
    pub document_id: DocumentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DemandDocumentCommand {
    OpenDocument(OpenDocument),
    AddLine(AddLine),
    AddStorageUnit(AddStorageUnit),
    ApproveDocument(ApproveDocument),
    AssignToWave(AssignToWave),
    UnassignFromWave(UnassignFromWave),
    RecordAllocation(RecordAllocation),
    RevertAllocation(RevertAllocation),
    CancelDocument(CancelDocument),
    MarkPicked(MarkPicked),
    MarkShipped(MarkShipped),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DemandDocumentEvent {
    DocumentOpened {
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        category: DemandCategory,
        kind: DemandKind,
        occurred_at: DateTime<Utc>,
    },
    LineAdded {
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        product_id: ProductId,
        quantity: u32,
        requested_after: u32,
        occurred_at: DateTime<Utc>,
    },
    StorageUnitAdded {
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        storage_unit_id: StorageUnitId,
        occurred_at: DateTime<Utc>,
    },
    DocumentApproved {
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        occurred_at: DateTime<Utc>,
    },
    AssignedToWave {
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        wave_id: AggregateId,
        occurred_at: DateTime<Utc>,
    },
    UnassignedFromWave {
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        wave_id: AggregateId,
        occurred_at: DateTime<Utc>,
    },
    AllocationRecorded {
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        reservations: Vec<AllocatedReservation>,
        claimed_units: Vec<StorageUnitId>,
        job_ids: Vec<AggregateId>,
        occurred_at: DateTime<Utc>,
    },
    AllocationReverted {
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        occurred_at: DateTime<Utc>,
    },
    DocumentCancelled {
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    DocumentPicked {
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        occurred_at: DateTime<Utc>,
    },
    DocumentShipped {
        warehouse_id: WarehouseId,
        document_id: DocumentId,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for DemandDocumentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DemandDocumentEvent::DocumentOpened { .. } => "demand.document.opened",
            DemandDocumentEvent::LineAdded { .. } => "demand.document.line_added",
            DemandDocumentEvent::StorageUnitAdded { .. } => "demand.document.storage_unit_added",
            DemandDocumentEvent::DocumentApproved { .. } => "demand.document.approved",
            DemandDocumentEvent::AssignedToWave { .. } => "demand.document.assigned_to_wave",
            DemandDocumentEvent::UnassignedFromWave { .. } => "demand.document.unassigned_from_wave",
            DemandDocumentEvent::AllocationRecorded { .. } => "demand.document.allocation_recorded",
            DemandDocumentEvent::AllocationReverted { .. } => "demand.document.allocation_reverted",
            DemandDocumentEvent::DocumentCancelled { .. } => "demand.document.cancelled",
            DemandDocumentEvent::DocumentPicked { .. } => "demand.document.picked",
            DemandDocumentEvent::DocumentShipped { .. } => "demand.document.shipped",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DemandDocumentEvent::DocumentOpened { occurred_at, .. }
            | DemandDocumentEvent::LineAdded { occurred_at, .. }
            | DemandDocumentEvent::StorageUnitAdded { occurred_at, .. }
            | DemandDocumentEvent::DocumentApproved { occurred_at, .. }
            | DemandDocumentEvent::AssignedToWave { occurred_at, .. }
            | DemandDocumentEvent::UnassignedFromWave { occurred_at, .. }
            | DemandDocumentEvent::AllocationRecorded { occurred_at, .. }
            | DemandDocumentEvent::AllocationReverted { occurred_at, .. }
            | DemandDocumentEvent::DocumentCancelled { occurred_at, .. }
            | DemandDocumentEvent::DocumentPicked { occurred_at, .. }
            | DemandDocumentEvent::DocumentShipped { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for DemandDocument {
    type Command = DemandDocumentCommand;
    type Event = DemandDocumentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DemandDocumentEvent::DocumentOpened {
                warehouse_id,
                document_id,
                category,
                kind,
                ..
            } => {
                self.id = *document_id;
                self.warehouse_id = Some(*warehouse_id);
                self.category = *category;
                self.body = match kind {
                    DemandKind::Item => DemandBody::Items { lines: Vec::new() },
                    DemandKind::StorageUnit => DemandBody::StorageUnits { units: Vec::new() },
                };
                self.status = DocumentStatus::Pending;
                self.approved = false;
                self.created = true;
            }
            DemandDocumentEvent::LineAdded {
                product_id,
                requested_after,
                ..
            } => {
                if let DemandBody::Items { lines } = &mut self.body {
                    match lines.iter_mut().find(|l| l.product_id == *product_id) {
                        Some(line) => line.requested = *requested_after,
                        None => lines.push(DemandLine {
                            product_id: *product_id,
                            requested: *requested_after,
                            hard_allocated: 0,
                        }),
                    }
                }
            }
            DemandDocumentEvent::StorageUnitAdded {
                storage_unit_id, ..
            } => {
                if let DemandBody::StorageUnits { units } = &mut self.body {
                    units.push(*storage_unit_id);
                }
            }
            DemandDocumentEvent::DocumentApproved { .. } => {
                self.approved = true;
            }
            DemandDocumentEvent::AssignedToWave { wave_id, .. } => {
                self.wave_id = Some(*wave_id);
            }
            DemandDocumentEvent::UnassignedFromWave { .. } => {
                self.wave_id = None;
            }
            DemandDocumentEvent::AllocationRecorded {
                reservations,
                claimed_units,
                job_ids,
                ..
            } => {
                self.status = DocumentStatus::Allocated;
                if let DemandBody::Items { lines } = &mut self.body {
                    for line in lines.iter_mut() {
                        line.hard_allocated = reservations
                            .iter()
                            .filter(|r| r.product_id == line.product_id)
                            .map(|r| r.quantity)
                            .sum();
                    }
                }
                self.allocation = Some(RecordedAllocation {
                    reservations: reservations.clone(),
                    claimed_units: claimed_units.clone(),
                    job_ids: job_ids.clone(),
                });
            }
            DemandDocumentEvent::AllocationReverted { .. } => {
                self.status = DocumentStatus::Pending;
                self.approved = false;
                self.allocation = None;
                if let DemandBody::Items { lines } = &mut self.body {
                    for line in lines.iter_mut() {
                        line.hard_allocated = 0;
                    }
                }
            }
            DemandDocumentEvent::DocumentCancelled { .. } => {
                self.status = DocumentStatus::Cancelled;
            }
            DemandDocumentEvent::DocumentPicked { .. } => {
                self.status = DocumentStatus::Picked;
            }
            DemandDocumentEvent::DocumentShipped { .. } => {
                self.status = DocumentStatus::Shipped;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DemandDocumentCommand::OpenDocument(cmd) => self.handle_open(cmd),
            DemandDocumentCommand::AddLine(cmd) => self.handle_add_line(cmd),
            DemandDocumentCommand::AddStorageUnit(cmd) => self.handle_add_storage_unit(cmd),
            DemandDocumentCommand::ApproveDocument(cmd) => self.handle_approve(cmd),
            DemandDocumentCommand::AssignToWave(cmd) => self.handle_assign_to_wave(cmd),
            DemandDocumentCommand::UnassignFromWave(cmd) => self.handle_unassign_from_wave(cmd),
            DemandDocumentCommand::RecordAllocation(cmd) => self.handle_record_allocation(cmd),
            DemandDocumentCommand::RevertAllocation(cmd) => self.handle_revert_allocation(cmd),
            DemandDocumentCommand::CancelDocument(cmd) => self.handle_cancel(cmd),
            DemandDocumentCommand::MarkPicked(cmd) => self.handle_mark_picked(cmd),
            DemandDocumentCommand::MarkShipped(cmd) => self.handle_mark_shipped(cmd),
        }
    }
}

impl DemandDocument {
    fn ensure_warehouse(&self, warehouse_id: WarehouseId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.warehouse_id != Some(warehouse_id) {
            return Err(DomainError::invariant("warehouse mismatch"));
        }
        Ok(())
    }

    fn ensure_document_id(&self, document_id: DocumentId) -> Result<(), DomainError> {
        if self.id != document_id {
            return Err(DomainError::invariant("document_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenDocument) -> Result<Vec<DemandDocumentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("document already exists"));
        }

        Ok(vec![DemandDocumentEvent::DocumentOpened {
            warehouse_id: cmd.warehouse_id,
            document_id: cmd.document_id,
            category: cmd.category,
            kind: cmd.kind,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<DemandDocumentEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_document_id(cmd.document_id)?;

        if self.status != DocumentStatus::Pending || self.approved {
            return Err(DomainError::invariant(
                "lines can only be edited on a pending, unapproved document",
            ));
        }
        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let lines = match &self.body {
            DemandBody::Items { lines } => lines,
            DemandBody::StorageUnits { .. } => {
                return Err(DomainError::invariant(
                    "cannot add item lines to a storage-unit document",
                ));
            }
        };

        let requested_after = match lines.iter().find(|l| l.product_id == cmd.product_id) {
            Some(line) => line
                .requested
                .checked_add(cmd.quantity)
                .ok_or_else(|| DomainError::validation("quantity overflow"))?,
            None => cmd.quantity,
        };

        Ok(vec![DemandDocumentEvent::LineAdded {
            warehouse_id: cmd.warehouse_id,
            document_id: cmd.document_id,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            requested_after,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_add_storage_unit(
        &self,
        cmd: &AddStorageUnit,
    ) -> Result<Vec<DemandDocumentEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_document_id(cmd.document_id)?;

        if self.status != DocumentStatus::Pending || self.approved {
            return Err(DomainError::invariant(
                "units can only be edited on a pending, unapproved document",
            ));
        }

        let units = match &self.body {
            DemandBody::StorageUnits { units } => units,
            DemandBody::Items { .. } => {
                return Err(DomainError::invariant(
                    "cannot add storage units to an item document",
                ));
            }
        };

        if units.contains(&cmd.storage_unit_id) {
            return Err(DomainError::conflict("storage unit already on document"));
        }

        Ok(vec![DemandDocumentEvent::StorageUnitAdded {
            warehouse_id: cmd.warehouse_id,
            document_id: cmd.document_id,
            storage_unit_id: cmd.storage_unit_id,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_approve(
        &self,
        cmd: &ApproveDocument,
    ) -> Result<Vec<DemandDocumentEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_document_id(cmd.document_id)?;

        if self.status != DocumentStatus::Pending {
            return Err(DomainError::invariant("only pending documents can be approved"));
        }
        if self.approved {
            return Err(DomainError::conflict("document already approved"));
        }
        if self.body.is_empty() {
            return Err(DomainError::validation("cannot approve an empty document"));
        }

        Ok(vec![DemandDocumentEvent::DocumentApproved {
            warehouse_id: cmd.warehouse_id,
            document_id: cmd.document_id,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_assign_to_wave(
        &self,
        cmd: &AssignToWave,
    ) -> Result<Vec<DemandDocumentEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_document_id(cmd.document_id)?;

        if self.status != DocumentStatus::Pending || !self.approved {
            return Err(DomainError::invariant(
                "only approved pending documents can join a wave",
            ));
        }
        if self.wave_id.is_some() {
            return Err(DomainError::conflict("document already assigned to a wave"));
        }

        Ok(vec![DemandDocumentEvent::AssignedToWave {
            warehouse_id: cmd.warehouse_id,
            document_id: cmd.document_id,
            wave_id: cmd.wave_id,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_unassign_from_wave(
        &self,
        cmd: &UnassignFromWave,
    ) -> Result<Vec<DemandDocumentEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_document_id(cmd.document_id)?;

        match self.wave_id {
            Some(current) if current == cmd.wave_id => {}
            Some(_) => {
                return Err(DomainError::invariant("document assigned to a different wave"));
            }
            None => {
                return Err(DomainError::invariant("document not assigned to a wave"));
            }
        }

        Ok(vec![DemandDocumentEvent::UnassignedFromWave {
            warehouse_id: cmd.warehouse_id,
            document_id: cmd.document_id,
            wave_id: cmd.wave_id,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_record_allocation(
        &self,
        cmd: &RecordAllocation,
    ) -> Result<Vec<DemandDocumentEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_document_id(cmd.document_id)?;

        if self.status != DocumentStatus::Pending {
            return Err(DomainError::invariant(
                "allocation can only be recorded on a pending document",
            ));
        }
        if !self.approved {
            return Err(DomainError::invariant("document is not approved"));
        }

        // Item documents must be allocated in full: no implicit partials.
        if let DemandBody::Items { lines } = &self.body {
            for line in lines {
                let allocated: u32 = cmd
                    .reservations
                    .iter()
                    .filter(|r| r.product_id == line.product_id)
                    .map(|r| r.quantity)
                    .sum();
                if allocated != line.requested {
                    return Err(DomainError::invariant(format!(
                        "allocation does not cover line for product {} (requested {}, allocated {})",
                        line.product_id, line.requested, allocated
                    )));
                }
            }
        }

        Ok(vec![DemandDocumentEvent::AllocationRecorded {
            warehouse_id: cmd.warehouse_id,
            document_id: cmd.document_id,
            reservations: cmd.reservations.clone(),
            claimed_units: cmd.claimed_units.clone(),
            job_ids: cmd.job_ids.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_revert_allocation(
        &self,
        cmd: &RevertAllocation,
    ) -> Result<Vec<DemandDocumentEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_document_id(cmd.document_id)?;

        if self.status != DocumentStatus::Allocated {
            return Err(DomainError::invariant(
                "only allocated documents can be reverted",
            ));
        }

        Ok(vec![DemandDocumentEvent::AllocationReverted {
            warehouse_id: cmd.warehouse_id,
            document_id: cmd.document_id,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_cancel(&self, cmd: &CancelDocument) -> Result<Vec<DemandDocumentEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_document_id(cmd.document_id)?;

        // Allocated documents go through RevertAllocation first: the engine
        // releases their commitments, then they are pending again.
        if self.status != DocumentStatus::Pending {
            return Err(DomainError::invariant("only pending documents can be cancelled"));
        }
        if self.wave_id.is_some() {
            return Err(DomainError::invariant(
                "document must leave its wave before cancellation",
            ));
        }

        Ok(vec![DemandDocumentEvent::DocumentCancelled {
            warehouse_id: cmd.warehouse_id,
            document_id: cmd.document_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_mark_picked(&self, cmd: &MarkPicked) -> Result<Vec<DemandDocumentEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_document_id(cmd.document_id)?;

        if self.status != DocumentStatus::Allocated {
            return Err(DomainError::invariant("only allocated documents can be picked"));
        }

        Ok(vec![DemandDocumentEvent::DocumentPicked {
            warehouse_id: cmd.warehouse_id,
            document_id: cmd.document_id,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_mark_shipped(
        &self,
        cmd: &MarkShipped,
    ) -> Result<Vec<DemandDocumentEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_document_id(cmd.document_id)?;

        if self.status != DocumentStatus::Picked {
            return Err(DomainError::invariant("only picked documents can be shipped"));
        }

        Ok(vec![DemandDocumentEvent::DocumentShipped {
            warehouse_id: cmd.warehouse_id,
            document_id: cmd.document_id,
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

    fn test_document_id() -> DocumentId {
        DocumentId::new(AggregateId::new())
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn apply_all(doc: &mut DemandDocument, events: Vec<DemandDocumentEvent>) {
        for e in &events {
            doc.apply(e);
        }
    }

    fn open_item_document(warehouse_id: WarehouseId, document_id: DocumentId) -> DemandDocument {
        let mut doc = DemandDocument::empty(document_id);
        let events = doc
            .handle(&DemandDocumentCommand::OpenDocument(OpenDocument {
                warehouse_id,
                document_id,
                category: DemandCategory::Order,
                kind: DemandKind::Item,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut doc, events);
        doc
    }

    fn add_line(doc: &mut DemandDocument, product_id: ProductId, quantity: u32) {
        let events = doc
            .handle(&DemandDocumentCommand::AddLine(AddLine {
                warehouse_id: doc.warehouse_id().unwrap(),
                document_id: doc.id_typed(),
                product_id,
                quantity,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(doc, events);
    }

    fn approve(doc: &mut DemandDocument) {
        let events = doc
            .handle(&DemandDocumentCommand::ApproveDocument(ApproveDocument {
                warehouse_id: doc.warehouse_id().unwrap(),
                document_id: doc.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(doc, events);
    }

    #[test]
    fn lines_merge_per_product() {
        let mut doc = open_item_document(test_warehouse_id(), test_document_id());
        let product = test_product_id();

        add_line(&mut doc, product, 3);
        add_line(&mut doc, product, 2);

        match doc.body() {
            DemandBody::Items { lines } => {
                assert_eq!(lines.len(), 1);
                assert_eq!(lines[0].requested, 5);
                assert_eq!(lines[0].hard_allocated, 0);
            }
            _ => panic!("expected item body"),
        }
    }

    #[test]
    fn cannot_approve_empty_document() {
        let doc = open_item_document(test_warehouse_id(), test_document_id());
        let err = doc
            .handle(&DemandDocumentCommand::ApproveDocument(ApproveDocument {
                warehouse_id: doc.warehouse_id().unwrap(),
                document_id: doc.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn approved_document_rejects_line_edits() {
        let mut doc = open_item_document(test_warehouse_id(), test_document_id());
        add_line(&mut doc, test_product_id(), 1);
        approve(&mut doc);

        let err = doc
            .handle(&DemandDocumentCommand::AddLine(AddLine {
                warehouse_id: doc.warehouse_id().unwrap(),
                document_id: doc.id_typed(),
                product_id: test_product_id(),
                quantity: 1,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn item_lines_on_storage_unit_document_are_rejected() {
        let warehouse_id = test_warehouse_id();
        let document_id = test_document_id();
        let mut doc = DemandDocument::empty(document_id);
        let events = doc
            .handle(&DemandDocumentCommand::OpenDocument(OpenDocument {
                warehouse_id,
                document_id,
                category: DemandCategory::Transfer,
                kind: DemandKind::StorageUnit,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut doc, events);

        let err = doc
            .handle(&DemandDocumentCommand::AddLine(AddLine {
                warehouse_id,
                document_id,
                product_id: test_product_id(),
                quantity: 1,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn allocation_requires_approval() {
        let mut doc = open_item_document(test_warehouse_id(), test_document_id());
        let product = test_product_id();
        add_line(&mut doc, product, 2);

        let err = doc
            .handle(&DemandDocumentCommand::RecordAllocation(RecordAllocation {
                warehouse_id: doc.warehouse_id().unwrap(),
                document_id: doc.id_typed(),
                reservations: vec![AllocatedReservation {
                    storage_unit_id: StorageUnitId::new(AggregateId::new()),
                    product_id: product,
                    quantity: 2,
                }],
                claimed_units: vec![],
                job_ids: vec![AggregateId::new()],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn allocation_must_cover_every_line_exactly() {
        let mut doc = open_item_document(test_warehouse_id(), test_document_id());
        let product = test_product_id();
        add_line(&mut doc, product, 5);
        approve(&mut doc);

        // Partial coverage rejected: no implicit partial fulfillment.
        let err = doc
            .handle(&DemandDocumentCommand::RecordAllocation(RecordAllocation {
                warehouse_id: doc.warehouse_id().unwrap(),
                document_id: doc.id_typed(),
                reservations: vec![AllocatedReservation {
                    storage_unit_id: StorageUnitId::new(AggregateId::new()),
                    product_id: product,
                    quantity: 3,
                }],
                claimed_units: vec![],
                job_ids: vec![],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn full_lifecycle_pending_to_shipped() {
        let mut doc = open_item_document(test_warehouse_id(), test_document_id());
        let product = test_product_id();
        add_line(&mut doc, product, 5);
        approve(&mut doc);

        let unit = StorageUnitId::new(AggregateId::new());
        let events = doc
            .handle(&DemandDocumentCommand::RecordAllocation(RecordAllocation {
                warehouse_id: doc.warehouse_id().unwrap(),
                document_id: doc.id_typed(),
                reservations: vec![AllocatedReservation {
                    storage_unit_id: unit,
                    product_id: product,
                    quantity: 5,
                }],
                claimed_units: vec![],
                job_ids: vec![AggregateId::new()],
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut doc, events);
        assert_eq!(doc.status(), DocumentStatus::Allocated);
        match doc.body() {
            DemandBody::Items { lines } => assert_eq!(lines[0].hard_allocated, 5),
            _ => panic!("expected item body"),
        }

        let events = doc
            .handle(&DemandDocumentCommand::MarkPicked(MarkPicked {
                warehouse_id: doc.warehouse_id().unwrap(),
                document_id: doc.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut doc, events);
        assert_eq!(doc.status(), DocumentStatus::Picked);

        let events = doc
            .handle(&DemandDocumentCommand::MarkShipped(MarkShipped {
                warehouse_id: doc.warehouse_id().unwrap(),
                document_id: doc.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut doc, events);
        assert_eq!(doc.status(), DocumentStatus::Shipped);
    }

    #[test]
    fn revert_returns_document_to_unapproved_pending() {
        let mut doc = open_item_document(test_warehouse_id(), test_document_id());
        let product = test_product_id();
        add_line(&mut doc, product, 2);
        approve(&mut doc);

        let events = doc
            .handle(&DemandDocumentCommand::RecordAllocation(RecordAllocation {
                warehouse_id: doc.warehouse_id().unwrap(),
                document_id: doc.id_typed(),
                reservations: vec![AllocatedReservation {
                    storage_unit_id: StorageUnitId::new(AggregateId::new()),
                    product_id: product,
                    quantity: 2,
                }],
                claimed_units: vec![],
                job_ids: vec![],
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut doc, events);

        let events = doc
            .handle(&DemandDocumentCommand::RevertAllocation(RevertAllocation {
                warehouse_id: doc.warehouse_id().unwrap(),
                document_id: doc.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut doc, events);

        assert_eq!(doc.status(), DocumentStatus::Pending);
        assert!(!doc.is_approved());
        assert!(doc.allocation().is_none());
        match doc.body() {
            DemandBody::Items { lines } => assert_eq!(lines[0].hard_allocated, 0),
            _ => panic!("expected item body"),
        }
    }

    #[test]
    fn wave_membership_is_exclusive() {
        let mut doc = open_item_document(test_warehouse_id(), test_document_id());
        add_line(&mut doc, test_product_id(), 1);
        approve(&mut doc);

        let wave_a = AggregateId::new();
        let events = doc
            .handle(&DemandDocumentCommand::AssignToWave(AssignToWave {
                warehouse_id: doc.warehouse_id().unwrap(),
                document_id: doc.id_typed(),
                wave_id: wave_a,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut doc, events);

        let err = doc
            .handle(&DemandDocumentCommand::AssignToWave(AssignToWave {
                warehouse_id: doc.warehouse_id().unwrap(),
                document_id: doc.id_typed(),
                wave_id: AggregateId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        // Cancellation while assigned is blocked until the wave lets go.
        let err = doc
            .handle(&DemandDocumentCommand::CancelDocument(CancelDocument {
                warehouse_id: doc.warehouse_id().unwrap(),
                document_id: doc.id_typed(),
                reason: "test".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn cancel_pending_document() {
        let mut doc = open_item_document(test_warehouse_id(), test_document_id());
        add_line(&mut doc, test_product_id(), 1);

        let events = doc
            .handle(&DemandDocumentCommand::CancelDocument(CancelDocument {
                warehouse_id: doc.warehouse_id().unwrap(),
                document_id: doc.id_typed(),
                reason: "customer withdrew".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut doc, events);
        assert_eq!(doc.status(), DocumentStatus::Cancelled);
    }
}

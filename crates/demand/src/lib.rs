//! `packwave-demand` — demand document domain (orders and transfers).

pub mod document;

pub use document::{
    AddLine, AddStorageUnit, AllocatedReservation, ApproveDocument, AssignToWave, CancelDocument,
    DemandBody, DemandCategory, DemandDocument, DemandDocumentCommand, DemandDocumentEvent,
    DemandKind, DemandLine, DocumentId, DocumentStatus, MarkPicked, MarkShipped, OpenDocument,
    RecordAllocation, RecordedAllocation, RevertAllocation, UnassignFromWave,
};

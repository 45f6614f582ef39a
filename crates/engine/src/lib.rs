//! `packwave-engine` — allocation engine, wave releaser and lifecycle
//! controller.
//!
//! The only code that converts soft commitments into hard commitments, and
//! the only code that rolls them back. Every operation here runs the whole
//! read-then-decide-then-write sequence under a per-warehouse lock, with the
//! stock ledger's own re-validation and the event store's optimistic append
//! as second and third lines of defense.

pub mod engine;
pub mod error;
pub mod planner;


pub use engine::{
    AllocationEngine, AllocationOutcome, CancelDocumentOutcome, TaskPickOutcome,
    WaveCancelOutcome, WaveReleaseOutcome,
};
pub use error::{AllocationError, ShortageItem, ShortageReport};
pub use planner::{DocumentPlan, LedgerPlanner, PlannedShortage};

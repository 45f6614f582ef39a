//! `packwave-stock` — the stock ledger domain.
//!
//! The ledger is the single source of truth for physical quantity and
//! in-flight hard commitments per storage unit and product. Every other
//! entity's allocation fields are derived claims against it.

pub mod ledger;

pub use ledger::{
    AllocationOrigin, CommitReservations, LedgerId, LedgerOpened, OpenLedger, ReceiveStock,
    RegisterStorageUnit, ReleaseReservations, ReservationEntry, StockCommitted, StockLedger,
    StockLedgerCommand, StockLedgerEvent, StockLine, StockReceived, StockReleased, StorageUnit,
    StorageUnitClaimReleased, StorageUnitClaimed, StorageUnitId, StorageUnitRegistered, UnitClaim,
    Zone,
};

//! Disposable, rebuildable read models fed by published event envelopes.
//!
//! Every projection is cursor-guarded per `(warehouse, aggregate)` stream:
//! duplicates are skipped (at-least-once delivery), gaps are rejected.
//! Values are display/eligibility data only — the allocation engine plans
//! against rehydrated aggregates, never against these.

pub mod atp;
pub mod cursors;
pub mod demand_documents;
pub mod picking_jobs;
pub mod product_catalog;
pub mod stock_levels;
pub mod waves;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("warehouse isolation violation: {0}")]
    WarehouseIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

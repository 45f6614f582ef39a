//! Allocation error taxonomy.
//!
//! Shortage is the expected, common outcome of demand exceeding supply — a
//! structured report for the operator, never a generic failure. Over-release
//! is the opposite: a bookkeeping bug that must abort loudly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use packwave_products::ProductId;

/// Per-SKU shortage breakdown line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortageItem {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub needed: u32,
    pub available: u32,
    pub missing: u32,
}

/// Structured shortage report, surfaced verbatim to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortageReport {
    pub items: Vec<ShortageItem>,
}

impl ShortageReport {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl core::fmt::Display for ShortageReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(
                f,
                "{} ({}): needed {}, available {}, missing {}",
                item.sku, item.name, item.needed, item.available, item.missing
            )?;
        }
        Ok(())
    }
}

/// Engine operation error.
///
/// Everything here aborts the enclosing operation fully; nothing is ever
/// partially committed.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// The demand document does not exist in this warehouse.
    #[error("document not found")]
    DocumentNotFound,

    /// The wave does not exist in this warehouse.
    #[error("wave not found")]
    WaveNotFound,

    /// Precondition violation: the document has not been approved.
    #[error("document is not approved")]
    NotApproved,

    /// The document belongs to an open wave and cannot be allocated or
    /// cancelled outside the wave flow.
    #[error("document is assigned to an open wave")]
    DocumentInWave,

    /// Demand exceeds supply. Expected and common; render as a report.
    #[error("shortage: {0}")]
    Shortage(ShortageReport),

    /// The operation is not valid for the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The ledger rejected a commit that planning approved — a concurrent
    /// writer got in between. Safe to retry the whole call from scratch.
    #[error("insufficient physical stock at commit time: {0}")]
    InsufficientPhysicalStock(String),

    /// Releasing more than is committed: a rollback bug upstream. Fatal.
    #[error("over-release detected: {0}")]
    OverRelease(String),

    /// Optimistic-concurrency collision during the validate-then-commit
    /// window. Safe to retry the whole call, never part of it.
    #[error("concurrent conflict: {0}")]
    ConcurrentConflict(String),

    /// Pick-work has already been physically performed and blocks rollback.
    #[error("picked tasks exist; cannot roll back")]
    PickedWorkExists,

    /// Infrastructure failure (store, serialization, publication).
    #[error("internal error: {0}")]
    Internal(String),
}

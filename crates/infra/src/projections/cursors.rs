//! Per-stream cursor tracking for idempotent projections.

use std::collections::HashMap;
use std::sync::RwLock;

use packwave_core::{AggregateId, WarehouseId};

use super::ProjectionError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    warehouse_id: WarehouseId,
    aggregate_id: AggregateId,
}

/// Outcome of a cursor check for one incoming envelope.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CursorCheck {
    /// Duplicate or replay; safe to ignore.
    Skip,
    /// Next in sequence; apply and then `advance`.
    Apply,
}

/// Sequence cursors per `(warehouse, aggregate)` stream.
///
/// The first event of a stream may carry any positive sequence number (some
/// stores start above 1); after that, strictly monotonic increments are
/// enforced.
#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<CursorKey, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(
        &self,
        warehouse_id: WarehouseId,
        aggregate_id: AggregateId,
        sequence_number: u64,
    ) -> Result<CursorCheck, ProjectionError> {
        let key = CursorKey {
            warehouse_id,
            aggregate_id,
        };
        let last = self
            .inner
            .read()
            .ok()
            .and_then(|m| m.get(&key).copied())
            .unwrap_or(0);

        if sequence_number == 0 {
            return Err(ProjectionError::NonMonotonicSequence {
                last,
                found: sequence_number,
            });
        }
        if sequence_number <= last {
            return Ok(CursorCheck::Skip);
        }
        if last != 0 && sequence_number != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence {
                last,
                found: sequence_number,
            });
        }

        Ok(CursorCheck::Apply)
    }

    pub fn advance(
        &self,
        warehouse_id: WarehouseId,
        aggregate_id: AggregateId,
        sequence_number: u64,
    ) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(
                CursorKey {
                    warehouse_id,
                    aggregate_id,
                },
                sequence_number,
            );
        }
    }

    pub fn clear(&self) {
        if let Ok(mut map) = self.inner.write() {
            map.clear();
        }
    }
}

//! Per-request warehouse context.

use packwave_core::{UserId, WarehouseId};

/// Warehouse scope + actor identity for one request.
///
/// Authentication is an upstream concern; the actor id travels through so
/// commit/release audit records name who acted.
#[derive(Debug, Clone, Copy)]
pub struct WarehouseContext {
    warehouse_id: WarehouseId,
    actor: UserId,
}

impl WarehouseContext {
    pub fn new(warehouse_id: WarehouseId, actor: UserId) -> Self {
        Self {
            warehouse_id,
            actor,
        }
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn actor(&self) -> UserId {
        self.actor
    }
}

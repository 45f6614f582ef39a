use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use packwave_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId, WarehouseId};
use packwave_events::Event;
use packwave_products::ProductId;

/// Stock ledger identifier. One ledger per warehouse; the aggregate id is
/// derived from the warehouse id so callers can always find it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerId(pub AggregateId);

impl LedgerId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// Deterministic ledger id for a warehouse.
    pub fn for_warehouse(warehouse_id: WarehouseId) -> Self {
        Self(AggregateId::from_uuid(*warehouse_id.as_uuid()))
    }
}

impl core::fmt::Display for LedgerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Storage unit identifier (a bin, box or pallet instance).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageUnitId(pub AggregateId);

impl StorageUnitId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for StorageUnitId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Spatial zone label, scoping one picking job's travel area.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Zone(pub String);

impl Zone {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Zone {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl packwave_core::ValueObject for Zone {}

/// One (storage unit, product) stock record.
///
/// Invariant: `0 <= hard_committed <= quantity` at all times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub quantity: u32,
    pub hard_committed: u32,
    /// Monotonic per-ledger receipt counter stamped on first receipt;
    /// drives the deterministic oldest-received-first selection order.
    pub received_seq: u64,
}

impl StockLine {
    pub fn available(&self) -> u32 {
        self.quantity - self.hard_committed
    }
}

/// A storage unit: zone placement + owned stock lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUnit {
    pub zone: Zone,
    pub lines: BTreeMap<ProductId, StockLine>,
}

impl StorageUnit {
    /// True if any line on this unit carries a hard commitment.
    pub fn has_commitments(&self) -> bool {
        self.lines.values().any(|l| l.hard_committed > 0)
    }
}

/// What an allocation batch was committed on behalf of (audit metadata).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AllocationOrigin {
    Document { document_id: AggregateId },
    Wave { wave_id: AggregateId },
}

/// One reservation: take `quantity` of `product_id` from `storage_unit_id`
/// on behalf of `document_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationEntry {
    pub document_id: AggregateId,
    pub storage_unit_id: StorageUnitId,
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Exclusive whole-unit claim by a demand document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitClaim {
    pub storage_unit_id: StorageUnitId,
    pub document_id: AggregateId,
}

/// Aggregate root: StockLedger.
///
/// Warehouse-scoped. All hard-commitment mutations for one warehouse flow
/// through this single stream, so one command batch is one atomic append:
/// either every reservation of an allocation (or a whole wave) commits, or
/// none does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLedger {
    id: LedgerId,
    warehouse_id: Option<WarehouseId>,
    units: BTreeMap<StorageUnitId, StorageUnit>,
    /// Explicit claim table: unit -> claiming document. Not a nullable field
    /// on the unit, so the "already claimed" check shares the ledger's
    /// concurrency window.
    claims: BTreeMap<StorageUnitId, AggregateId>,
    next_received_seq: u64,
    version: u64,
    created: bool,
}

impl StockLedger {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: LedgerId) -> Self {
        Self {
            id,
            warehouse_id: None,
            units: BTreeMap::new(),
            claims: BTreeMap::new(),
            next_received_seq: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> LedgerId {
        self.id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn is_open(&self) -> bool {
        self.created
    }

    pub fn unit(&self, unit_id: StorageUnitId) -> Option<&StorageUnit> {
        self.units.get(&unit_id)
    }

    pub fn units(&self) -> impl Iterator<Item = (StorageUnitId, &StorageUnit)> {
        self.units.iter().map(|(id, u)| (*id, u))
    }

    pub fn claim_of(&self, unit_id: StorageUnitId) -> Option<AggregateId> {
        self.claims.get(&unit_id).copied()
    }

    /// Physical availability: Σ `(quantity - hard_committed)` across all lines
    /// for the product. Stock on a unit claimed whole by another document is
    /// excluded from `claimed_by` when planning, not here.
    pub fn physical_available(&self, product_id: ProductId) -> u32 {
        self.units
            .values()
            .filter_map(|u| u.lines.get(&product_id))
            .map(|l| l.available())
            .sum()
    }

    /// Candidate lines for a product in deterministic oldest-received-first
    /// order: `(received_seq, storage_unit_id)`. Units under a whole-unit
    /// claim are skipped — their stock is spoken for.
    pub fn fifo_lines(&self, product_id: ProductId) -> Vec<(StorageUnitId, StockLine)> {
        let mut lines: Vec<(StorageUnitId, StockLine)> = self
            .units
            .iter()
            .filter(|(unit_id, _)| !self.claims.contains_key(unit_id))
            .filter_map(|(unit_id, unit)| {
                unit.lines.get(&product_id).map(|line| (*unit_id, *line))
            })
            .filter(|(_, line)| line.available() > 0)
            .collect();
        lines.sort_by_key(|(unit_id, line)| (line.received_seq, *unit_id));
        lines
    }

    fn line(&self, unit_id: StorageUnitId, product_id: ProductId) -> Option<&StockLine> {
        self.units.get(&unit_id).and_then(|u| u.lines.get(&product_id))
    }
}

impl AggregateRoot for StockLedger {
    type Id = LedgerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenLedger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenLedger {
    pub warehouse_id: WarehouseId,
    pub ledger_id: LedgerId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterStorageUnit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterStorageUnit {
    pub warehouse_id: WarehouseId,
    pub ledger_id: LedgerId,
    pub storage_unit_id: StorageUnitId,
    pub zone: Zone,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveStock (physical inflow; never touches commitments).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub warehouse_id: WarehouseId,
    pub ledger_id: LedgerId,
    pub storage_unit_id: StorageUnitId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CommitReservations.
///
/// The whole batch is validated against current state and either commits as
/// one event batch or is rejected without effect. Claims ride in the same
/// batch so whole-unit exclusivity commits atomically with the quantities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReservations {
    pub warehouse_id: WarehouseId,
    pub ledger_id: LedgerId,
    pub origin: AllocationOrigin,
    pub entries: Vec<ReservationEntry>,
    pub claims: Vec<UnitClaim>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseReservations (exact rollback of earlier commits).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReservations {
    pub warehouse_id: WarehouseId,
    pub ledger_id: LedgerId,
    pub origin: AllocationOrigin,
    pub entries: Vec<ReservationEntry>,
    pub claim_releases: Vec<UnitClaim>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockLedgerCommand {
    OpenLedger(OpenLedger),
    RegisterStorageUnit(RegisterStorageUnit),
    ReceiveStock(ReceiveStock),
    CommitReservations(CommitReservations),
    ReleaseReservations(ReleaseReservations),
}

/// Event: LedgerOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerOpened {
    pub warehouse_id: WarehouseId,
    pub ledger_id: LedgerId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StorageUnitRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUnitRegistered {
    pub warehouse_id: WarehouseId,
    pub ledger_id: LedgerId,
    pub storage_unit_id: StorageUnitId,
    pub zone: Zone,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceived {
    pub warehouse_id: WarehouseId,
    pub ledger_id: LedgerId,
    pub storage_unit_id: StorageUnitId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub quantity_after: u32,
    pub received_seq: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockCommitted. Carries actor and before/after committed
/// quantities — the append-only stream doubles as the audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCommitted {
    pub warehouse_id: WarehouseId,
    pub ledger_id: LedgerId,
    pub origin: AllocationOrigin,
    pub document_id: AggregateId,
    pub storage_unit_id: StorageUnitId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub committed_before: u32,
    pub committed_after: u32,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub warehouse_id: WarehouseId,
    pub ledger_id: LedgerId,
    pub origin: AllocationOrigin,
    pub document_id: AggregateId,
    pub storage_unit_id: StorageUnitId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub committed_before: u32,
    pub committed_after: u32,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StorageUnitClaimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUnitClaimed {
    pub warehouse_id: WarehouseId,
    pub ledger_id: LedgerId,
    pub storage_unit_id: StorageUnitId,
    pub document_id: AggregateId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StorageUnitClaimReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUnitClaimReleased {
    pub warehouse_id: WarehouseId,
    pub ledger_id: LedgerId,
    pub storage_unit_id: StorageUnitId,
    pub document_id: AggregateId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockLedgerEvent {
    LedgerOpened(LedgerOpened),
    StorageUnitRegistered(StorageUnitRegistered),
    StockReceived(StockReceived),
    StockCommitted(StockCommitted),
    StockReleased(StockReleased),
    StorageUnitClaimed(StorageUnitClaimed),
    StorageUnitClaimReleased(StorageUnitClaimReleased),
}

impl Event for StockLedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockLedgerEvent::LedgerOpened(_) => "stock.ledger.opened",
            StockLedgerEvent::StorageUnitRegistered(_) => "stock.ledger.storage_unit_registered",
            StockLedgerEvent::StockReceived(_) => "stock.ledger.stock_received",
            StockLedgerEvent::StockCommitted(_) => "stock.ledger.stock_committed",
            StockLedgerEvent::StockReleased(_) => "stock.ledger.stock_released",
            StockLedgerEvent::StorageUnitClaimed(_) => "stock.ledger.storage_unit_claimed",
            StockLedgerEvent::StorageUnitClaimReleased(_) => {
                "stock.ledger.storage_unit_claim_released"
            }
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockLedgerEvent::LedgerOpened(e) => e.occurred_at,
            StockLedgerEvent::StorageUnitRegistered(e) => e.occurred_at,
            StockLedgerEvent::StockReceived(e) => e.occurred_at,
            StockLedgerEvent::StockCommitted(e) => e.occurred_at,
            StockLedgerEvent::StockReleased(e) => e.occurred_at,
            StockLedgerEvent::StorageUnitClaimed(e) => e.occurred_at,
            StockLedgerEvent::StorageUnitClaimReleased(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockLedger {
    type Command = StockLedgerCommand;
    type Event = StockLedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockLedgerEvent::LedgerOpened(e) => {
                self.id = e.ledger_id;
                self.warehouse_id = Some(e.warehouse_id);
                self.created = true;
            }
            StockLedgerEvent::StorageUnitRegistered(e) => {
                self.units.insert(
                    e.storage_unit_id,
                    StorageUnit {
                        zone: e.zone.clone(),
                        lines: BTreeMap::new(),
                    },
                );
            }
            StockLedgerEvent::StockReceived(e) => {
                if let Some(unit) = self.units.get_mut(&e.storage_unit_id) {
                    let line = unit.lines.entry(e.product_id).or_insert(StockLine {
                        quantity: 0,
                        hard_committed: 0,
                        received_seq: e.received_seq,
                    });
                    line.quantity = e.quantity_after;
                }
                if e.received_seq >= self.next_received_seq {
                    self.next_received_seq = e.received_seq + 1;
                }
            }
            StockLedgerEvent::StockCommitted(e) => {
                if let Some(unit) = self.units.get_mut(&e.storage_unit_id) {
                    if let Some(line) = unit.lines.get_mut(&e.product_id) {
                        line.hard_committed = e.committed_after;
                    }
                }
            }
            StockLedgerEvent::StockReleased(e) => {
                if let Some(unit) = self.units.get_mut(&e.storage_unit_id) {
                    if let Some(line) = unit.lines.get_mut(&e.product_id) {
                        line.hard_committed = e.committed_after;
                    }
                }
            }
            StockLedgerEvent::StorageUnitClaimed(e) => {
                self.claims.insert(e.storage_unit_id, e.document_id);
            }
            StockLedgerEvent::StorageUnitClaimReleased(e) => {
                self.claims.remove(&e.storage_unit_id);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockLedgerCommand::OpenLedger(cmd) => self.handle_open(cmd),
            StockLedgerCommand::RegisterStorageUnit(cmd) => self.handle_register(cmd),
            StockLedgerCommand::ReceiveStock(cmd) => self.handle_receive(cmd),
            StockLedgerCommand::CommitReservations(cmd) => self.handle_commit(cmd),
            StockLedgerCommand::ReleaseReservations(cmd) => self.handle_release(cmd),
        }
    }
}

impl StockLedger {
    fn ensure_warehouse(&self, warehouse_id: WarehouseId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.warehouse_id != Some(warehouse_id) {
            return Err(DomainError::invariant("warehouse mismatch"));
        }
        Ok(())
    }

    fn ensure_ledger_id(&self, ledger_id: LedgerId) -> Result<(), DomainError> {
        if self.id != ledger_id {
            return Err(DomainError::invariant("ledger_id mismatch"));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenLedger) -> Result<Vec<StockLedgerEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("ledger already open"));
        }

        Ok(vec![StockLedgerEvent::LedgerOpened(LedgerOpened {
            warehouse_id: cmd.warehouse_id,
            ledger_id: cmd.ledger_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register(
        &self,
        cmd: &RegisterStorageUnit,
    ) -> Result<Vec<StockLedgerEvent>, DomainError> {
        self.ensure_open()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_ledger_id(cmd.ledger_id)?;

        if self.units.contains_key(&cmd.storage_unit_id) {
            return Err(DomainError::conflict("storage unit already registered"));
        }
        if cmd.zone.as_str().trim().is_empty() {
            return Err(DomainError::validation("zone cannot be empty"));
        }

        Ok(vec![StockLedgerEvent::StorageUnitRegistered(
            StorageUnitRegistered {
                warehouse_id: cmd.warehouse_id,
                ledger_id: cmd.ledger_id,
                storage_unit_id: cmd.storage_unit_id,
                zone: cmd.zone.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<StockLedgerEvent>, DomainError> {
        self.ensure_open()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_ledger_id(cmd.ledger_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let unit = self
            .units
            .get(&cmd.storage_unit_id)
            .ok_or_else(|| DomainError::validation("unknown storage unit"))?;

        let (quantity_after, received_seq) = match unit.lines.get(&cmd.product_id) {
            Some(line) => (
                line.quantity
                    .checked_add(cmd.quantity)
                    .ok_or_else(|| DomainError::validation("quantity overflow"))?,
                line.received_seq,
            ),
            None => (cmd.quantity, self.next_received_seq),
        };

        Ok(vec![StockLedgerEvent::StockReceived(StockReceived {
            warehouse_id: cmd.warehouse_id,
            ledger_id: cmd.ledger_id,
            storage_unit_id: cmd.storage_unit_id,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            quantity_after,
            received_seq,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Validate and commit a full reservation batch.
    ///
    /// Re-validates every entry against the current (freshly rehydrated)
    /// state — an earlier availability read is never trusted here. Entries
    /// may repeat the same line, so the check tracks cumulative consumption.
    fn handle_commit(
        &self,
        cmd: &CommitReservations,
    ) -> Result<Vec<StockLedgerEvent>, DomainError> {
        self.ensure_open()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_ledger_id(cmd.ledger_id)?;

        if cmd.entries.is_empty() && cmd.claims.is_empty() {
            return Err(DomainError::validation("empty reservation batch"));
        }

        // Claims first: a unit may only be claimed once, by one document.
        let mut new_claims: BTreeMap<StorageUnitId, AggregateId> = BTreeMap::new();
        for claim in &cmd.claims {
            if !self.units.contains_key(&claim.storage_unit_id) {
                return Err(DomainError::validation("claim on unknown storage unit"));
            }
            if self.claims.contains_key(&claim.storage_unit_id)
                || new_claims.contains_key(&claim.storage_unit_id)
            {
                return Err(DomainError::invariant(format!(
                    "storage unit {} already claimed",
                    claim.storage_unit_id
                )));
            }
            new_claims.insert(claim.storage_unit_id, claim.document_id);
        }

        // Cumulative availability check across the whole batch.
        let mut consumed: BTreeMap<(StorageUnitId, ProductId), u32> = BTreeMap::new();
        for entry in &cmd.entries {
            if entry.quantity == 0 {
                return Err(DomainError::validation("reservation quantity must be positive"));
            }

            let line = self
                .line(entry.storage_unit_id, entry.product_id)
                .ok_or_else(|| DomainError::validation("reservation on unknown stock line"))?;

            // A unit claimed whole belongs to exactly one document; nobody
            // else's reservations may land on it in the same batch either.
            let claimed_by = self
                .claims
                .get(&entry.storage_unit_id)
                .or_else(|| new_claims.get(&entry.storage_unit_id));
            if let Some(holder) = claimed_by {
                if *holder != entry.document_id {
                    return Err(DomainError::invariant(format!(
                        "storage unit {} claimed by another document",
                        entry.storage_unit_id
                    )));
                }
            }

            let key = (entry.storage_unit_id, entry.product_id);
            let already = consumed.get(&key).copied().unwrap_or(0);
            let wanted = already
                .checked_add(entry.quantity)
                .ok_or_else(|| DomainError::validation("quantity overflow"))?;
            if wanted > line.available() {
                return Err(DomainError::invariant(format!(
                    "insufficient physical stock: unit {} product {} (available {}, requested {})",
                    entry.storage_unit_id,
                    entry.product_id,
                    line.available(),
                    wanted
                )));
            }
            consumed.insert(key, wanted);
        }

        // Emit per-entry commit events with before/after, then the claims.
        let mut running: BTreeMap<(StorageUnitId, ProductId), u32> = BTreeMap::new();
        let mut events = Vec::with_capacity(cmd.entries.len() + cmd.claims.len());
        for entry in &cmd.entries {
            let key = (entry.storage_unit_id, entry.product_id);
            let line = self
                .line(entry.storage_unit_id, entry.product_id)
                .ok_or_else(|| DomainError::validation("reservation on unknown stock line"))?;
            let before = line.hard_committed + running.get(&key).copied().unwrap_or(0);
            let after = before + entry.quantity;
            running.insert(key, after - line.hard_committed);

            events.push(StockLedgerEvent::StockCommitted(StockCommitted {
                warehouse_id: cmd.warehouse_id,
                ledger_id: cmd.ledger_id,
                origin: cmd.origin,
                document_id: entry.document_id,
                storage_unit_id: entry.storage_unit_id,
                product_id: entry.product_id,
                quantity: entry.quantity,
                committed_before: before,
                committed_after: after,
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            }));
        }
        for claim in &cmd.claims {
            events.push(StockLedgerEvent::StorageUnitClaimed(StorageUnitClaimed {
                warehouse_id: cmd.warehouse_id,
                ledger_id: cmd.ledger_id,
                storage_unit_id: claim.storage_unit_id,
                document_id: claim.document_id,
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    /// Validate and release a full reservation batch.
    ///
    /// Releasing more than is committed is an upstream bookkeeping bug:
    /// fail loudly, never clamp.
    fn handle_release(
        &self,
        cmd: &ReleaseReservations,
    ) -> Result<Vec<StockLedgerEvent>, DomainError> {
        self.ensure_open()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_ledger_id(cmd.ledger_id)?;

        if cmd.entries.is_empty() && cmd.claim_releases.is_empty() {
            return Err(DomainError::validation("empty release batch"));
        }

        let mut released: BTreeMap<(StorageUnitId, ProductId), u32> = BTreeMap::new();
        for entry in &cmd.entries {
            if entry.quantity == 0 {
                return Err(DomainError::validation("release quantity must be positive"));
            }

            let line = self
                .line(entry.storage_unit_id, entry.product_id)
                .ok_or_else(|| DomainError::validation("release on unknown stock line"))?;

            let key = (entry.storage_unit_id, entry.product_id);
            let already = released.get(&key).copied().unwrap_or(0);
            let wanted = already + entry.quantity;
            if wanted > line.hard_committed {
                return Err(DomainError::invariant(format!(
                    "over-release: unit {} product {} (committed {}, release {})",
                    entry.storage_unit_id, entry.product_id, line.hard_committed, wanted
                )));
            }
            released.insert(key, wanted);
        }

        for claim in &cmd.claim_releases {
            match self.claims.get(&claim.storage_unit_id) {
                Some(holder) if *holder == claim.document_id => {}
                Some(_) => {
                    return Err(DomainError::invariant(format!(
                        "claim on {} held by another document",
                        claim.storage_unit_id
                    )));
                }
                None => {
                    return Err(DomainError::invariant(format!(
                        "no claim on {} to release",
                        claim.storage_unit_id
                    )));
                }
            }
        }

        let mut running: BTreeMap<(StorageUnitId, ProductId), u32> = BTreeMap::new();
        let mut events = Vec::with_capacity(cmd.entries.len() + cmd.claim_releases.len());
        for entry in &cmd.entries {
            let key = (entry.storage_unit_id, entry.product_id);
            let line = self
                .line(entry.storage_unit_id, entry.product_id)
                .ok_or_else(|| DomainError::validation("release on unknown stock line"))?;
            let before = line.hard_committed - running.get(&key).copied().unwrap_or(0);
            let after = before - entry.quantity;
            running.insert(key, line.hard_committed - after);

            events.push(StockLedgerEvent::StockReleased(StockReleased {
                warehouse_id: cmd.warehouse_id,
                ledger_id: cmd.ledger_id,
                origin: cmd.origin,
                document_id: entry.document_id,
                storage_unit_id: entry.storage_unit_id,
                product_id: entry.product_id,
                quantity: entry.quantity,
                committed_before: before,
                committed_after: after,
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            }));
        }
        for claim in &cmd.claim_releases {
            events.push(StockLedgerEvent::StorageUnitClaimReleased(
                StorageUnitClaimReleased {
                    warehouse_id: cmd.warehouse_id,
                    ledger_id: cmd.ledger_id,
                    storage_unit_id: claim.storage_unit_id,
                    document_id: claim.document_id,
                    actor: cmd.actor,
                    occurred_at: cmd.occurred_at,
                },
            ));
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packwave_core::AggregateId;
    use proptest::prelude::*;

    fn test_warehouse_id() -> WarehouseId {
        WarehouseId::new()
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_unit_id() -> StorageUnitId {
        StorageUnitId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn open_ledger(warehouse_id: WarehouseId) -> StockLedger {
        let ledger_id = LedgerId::for_warehouse(warehouse_id);
        let mut ledger = StockLedger::empty(ledger_id);
        let events = ledger
            .handle(&StockLedgerCommand::OpenLedger(OpenLedger {
                warehouse_id,
                ledger_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            ledger.apply(e);
        }
        ledger
    }

    fn apply_all(ledger: &mut StockLedger, events: Vec<StockLedgerEvent>) {
        for e in &events {
            ledger.apply(e);
        }
    }

    fn register_unit(ledger: &mut StockLedger, unit_id: StorageUnitId, zone: &str) {
        let events = ledger
            .handle(&StockLedgerCommand::RegisterStorageUnit(RegisterStorageUnit {
                warehouse_id: ledger.warehouse_id().unwrap(),
                ledger_id: ledger.id_typed(),
                storage_unit_id: unit_id,
                zone: Zone::new(zone),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(ledger, events);
    }

    fn receive(ledger: &mut StockLedger, unit_id: StorageUnitId, product_id: ProductId, qty: u32) {
        let events = ledger
            .handle(&StockLedgerCommand::ReceiveStock(ReceiveStock {
                warehouse_id: ledger.warehouse_id().unwrap(),
                ledger_id: ledger.id_typed(),
                storage_unit_id: unit_id,
                product_id,
                quantity: qty,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(ledger, events);
    }

    fn commit_one(
        ledger: &mut StockLedger,
        unit_id: StorageUnitId,
        product_id: ProductId,
        qty: u32,
    ) -> Result<(), DomainError> {
        let document_id = AggregateId::new();
        let events = ledger.handle(&StockLedgerCommand::CommitReservations(CommitReservations {
            warehouse_id: ledger.warehouse_id().unwrap(),
            ledger_id: ledger.id_typed(),
            origin: AllocationOrigin::Document { document_id },
            entries: vec![ReservationEntry {
                document_id,
                storage_unit_id: unit_id,
                product_id,
                quantity: qty,
            }],
            claims: vec![],
            actor: UserId::new(),
            occurred_at: test_time(),
        }))?;
        apply_all(ledger, events);
        Ok(())
    }

    #[test]
    fn receive_then_commit_tracks_availability() {
        let mut ledger = open_ledger(test_warehouse_id());
        let unit = test_unit_id();
        let product = test_product_id();
        register_unit(&mut ledger, unit, "A");
        receive(&mut ledger, unit, product, 10);

        assert_eq!(ledger.physical_available(product), 10);

        commit_one(&mut ledger, unit, product, 4).unwrap();
        assert_eq!(ledger.physical_available(product), 6);

        let line = ledger.unit(unit).unwrap().lines.get(&product).unwrap();
        assert_eq!(line.quantity, 10);
        assert_eq!(line.hard_committed, 4);
    }

    #[test]
    fn commit_beyond_available_is_rejected_without_effect() {
        let mut ledger = open_ledger(test_warehouse_id());
        let unit = test_unit_id();
        let product = test_product_id();
        register_unit(&mut ledger, unit, "A");
        receive(&mut ledger, unit, product, 5);

        let before = ledger.clone();
        let err = commit_one(&mut ledger, unit, product, 6).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(ledger, before);
    }

    #[test]
    fn batch_commit_checks_cumulative_consumption() {
        let mut ledger = open_ledger(test_warehouse_id());
        let unit = test_unit_id();
        let product = test_product_id();
        register_unit(&mut ledger, unit, "A");
        receive(&mut ledger, unit, product, 5);

        // Two entries of 3 against 5 available: batch must be rejected whole.
        let document_id = AggregateId::new();
        let entry = ReservationEntry {
            document_id,
            storage_unit_id: unit,
            product_id: product,
            quantity: 3,
        };
        let err = ledger
            .handle(&StockLedgerCommand::CommitReservations(CommitReservations {
                warehouse_id: ledger.warehouse_id().unwrap(),
                ledger_id: ledger.id_typed(),
                origin: AllocationOrigin::Document { document_id },
                entries: vec![entry, entry],
                claims: vec![],
                actor: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(ledger.physical_available(product), 5);
    }

    #[test]
    fn over_release_fails_loudly() {
        let mut ledger = open_ledger(test_warehouse_id());
        let unit = test_unit_id();
        let product = test_product_id();
        register_unit(&mut ledger, unit, "A");
        receive(&mut ledger, unit, product, 10);

        let document_id = AggregateId::new();
        let events = ledger
            .handle(&StockLedgerCommand::CommitReservations(CommitReservations {
                warehouse_id: ledger.warehouse_id().unwrap(),
                ledger_id: ledger.id_typed(),
                origin: AllocationOrigin::Document { document_id },
                entries: vec![ReservationEntry {
                    document_id,
                    storage_unit_id: unit,
                    product_id: product,
                    quantity: 3,
                }],
                claims: vec![],
                actor: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut ledger, events);

        let err = ledger
            .handle(&StockLedgerCommand::ReleaseReservations(ReleaseReservations {
                warehouse_id: ledger.warehouse_id().unwrap(),
                ledger_id: ledger.id_typed(),
                origin: AllocationOrigin::Document { document_id },
                entries: vec![ReservationEntry {
                    document_id,
                    storage_unit_id: unit,
                    product_id: product,
                    quantity: 4,
                }],
                claim_releases: vec![],
                actor: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        // The committed quantity is untouched.
        let line = ledger.unit(unit).unwrap().lines.get(&product).unwrap();
        assert_eq!(line.hard_committed, 3);
    }

    #[test]
    fn claimed_unit_rejects_second_claim_and_foreign_reservations() {
        let mut ledger = open_ledger(test_warehouse_id());
        let unit = test_unit_id();
        let product = test_product_id();
        register_unit(&mut ledger, unit, "A");
        receive(&mut ledger, unit, product, 8);

        let owner = AggregateId::new();
        let events = ledger
            .handle(&StockLedgerCommand::CommitReservations(CommitReservations {
                warehouse_id: ledger.warehouse_id().unwrap(),
                ledger_id: ledger.id_typed(),
                origin: AllocationOrigin::Document { document_id: owner },
                entries: vec![ReservationEntry {
                    document_id: owner,
                    storage_unit_id: unit,
                    product_id: product,
                    quantity: 8,
                }],
                claims: vec![UnitClaim {
                    storage_unit_id: unit,
                    document_id: owner,
                }],
                actor: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut ledger, events);
        assert_eq!(ledger.claim_of(unit), Some(owner));

        // Second claim by another document fails.
        let intruder = AggregateId::new();
        let err = ledger
            .handle(&StockLedgerCommand::CommitReservations(CommitReservations {
                warehouse_id: ledger.warehouse_id().unwrap(),
                ledger_id: ledger.id_typed(),
                origin: AllocationOrigin::Document {
                    document_id: intruder,
                },
                entries: vec![],
                claims: vec![UnitClaim {
                    storage_unit_id: unit,
                    document_id: intruder,
                }],
                actor: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        // Claimed units are invisible to FIFO planning.
        assert!(ledger.fifo_lines(product).is_empty());
    }

    #[test]
    fn fifo_lines_order_is_oldest_received_first() {
        let mut ledger = open_ledger(test_warehouse_id());
        let product = test_product_id();
        let unit_a = test_unit_id();
        let unit_b = test_unit_id();
        register_unit(&mut ledger, unit_a, "A");
        register_unit(&mut ledger, unit_b, "B");

        // B receives first, then A: B must be planned first.
        receive(&mut ledger, unit_b, product, 3);
        receive(&mut ledger, unit_a, product, 5);

        let lines = ledger.fifo_lines(product);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, unit_b);
        assert_eq!(lines[1].0, unit_a);

        // Topping up an existing line keeps its original receipt position.
        receive(&mut ledger, unit_b, product, 2);
        let lines = ledger.fifo_lines(product);
        assert_eq!(lines[0].0, unit_b);
        assert_eq!(lines[0].1.quantity, 5);
    }

    proptest! {
        /// Invariant: any sequence of receives, commits and releases keeps
        /// `0 <= hard_committed <= quantity`, because invalid commands are
        /// rejected without effect.
        #[test]
        fn committed_never_exceeds_quantity(ops in proptest::collection::vec((0u8..3, 1u32..20), 1..60)) {
            let warehouse_id = test_warehouse_id();
            let mut ledger = open_ledger(warehouse_id);
            let unit = test_unit_id();
            let product = test_product_id();
            register_unit(&mut ledger, unit, "A");

            let document_id = AggregateId::new();
            for (op, qty) in ops {
                let cmd = match op {
                    0 => StockLedgerCommand::ReceiveStock(ReceiveStock {
                        warehouse_id,
                        ledger_id: ledger.id_typed(),
                        storage_unit_id: unit,
                        product_id: product,
                        quantity: qty,
                        occurred_at: test_time(),
                    }),
                    1 => StockLedgerCommand::CommitReservations(CommitReservations {
                        warehouse_id,
                        ledger_id: ledger.id_typed(),
                        origin: AllocationOrigin::Document { document_id },
                        entries: vec![ReservationEntry {
                            document_id,
                            storage_unit_id: unit,
                            product_id: product,
                            quantity: qty,
                        }],
                        claims: vec![],
                        actor: UserId::new(),
                        occurred_at: test_time(),
                    }),
                    _ => StockLedgerCommand::ReleaseReservations(ReleaseReservations {
                        warehouse_id,
                        ledger_id: ledger.id_typed(),
                        origin: AllocationOrigin::Document { document_id },
                        entries: vec![ReservationEntry {
                            document_id,
                            storage_unit_id: unit,
                            product_id: product,
                            quantity: qty,
                        }],
                        claim_releases: vec![],
                        actor: UserId::new(),
                        occurred_at: test_time(),
                    }),
                };

                if let Ok(events) = ledger.handle(&cmd) {
                    for e in &events {
                        ledger.apply(e);
                    }
                }

                if let Some(line) = ledger.unit(unit).and_then(|u| u.lines.get(&product)) {
                    prop_assert!(line.hard_committed <= line.quantity);
                }
            }
        }
    }
}

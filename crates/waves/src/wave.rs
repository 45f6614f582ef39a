use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use packwave_core::{Aggregate, AggregateId, AggregateRoot, DomainError, WarehouseId};
use packwave_demand::DocumentId;
use packwave_events::Event;

/// Wave identifier (warehouse-scoped via `warehouse_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaveId(pub AggregateId);

impl WaveId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for WaveId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Wave lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveStatus {
    Planning,
    Released,
    Completed,
    Cancelled,
}

/// Aggregate operational stats, maintained as members join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveStats {
    pub document_count: u32,
    pub total_lines: u32,
    pub total_quantity: u32,
}

/// Aggregate root: Wave.
///
/// An ordered batch of demand documents released (and, if need be, rolled
/// back) as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    id: WaveId,
    warehouse_id: Option<WarehouseId>,
    status: WaveStatus,
    documents: Vec<DocumentId>,
    stats: WaveStats,
    job_ids: Vec<AggregateId>,
    version: u64,
    created: bool,
}

impl Wave {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: WaveId) -> Self {
        Self {
            id,
            warehouse_id: None,
            status: WaveStatus::Planning,
            documents: Vec::new(),
            stats: WaveStats::default(),
            job_ids: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> WaveId {
        self.id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn status(&self) -> WaveStatus {
        self.status
    }

    pub fn documents(&self) -> &[DocumentId] {
        &self.documents
    }

    pub fn stats(&self) -> WaveStats {
        self.stats
    }

    pub fn job_ids(&self) -> &[AggregateId] {
        &self.job_ids
    }
}

impl AggregateRoot for Wave {
    type Id = WaveId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenWave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenWave {
    pub warehouse_id: WarehouseId,
    pub wave_id: WaveId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddDocument (while planning only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddDocument {
    pub warehouse_id: WarehouseId,
    pub wave_id: WaveId,
    pub document_id: DocumentId,
    pub line_count: u32,
    pub total_quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkReleased (engine-only, after the wave-wide commit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReleased {
    pub warehouse_id: WarehouseId,
    pub wave_id: WaveId,
    pub job_ids: Vec<AggregateId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkCompleted {
    pub warehouse_id: WarehouseId,
    pub wave_id: WaveId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelWave (engine rolls back commitments before dispatching).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelWave {
    pub warehouse_id: WarehouseId,
    pub wave_id: WaveId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveCommand {
    OpenWave(OpenWave),
    AddDocument(AddDocument),
    MarkReleased(MarkReleased),
    MarkCompleted(MarkCompleted),
    CancelWave(CancelWave),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveEvent {
    WaveOpened {
        warehouse_id: WarehouseId,
        wave_id: WaveId,
        occurred_at: DateTime<Utc>,
    },
    DocumentAdded {
        warehouse_id: WarehouseId,
        wave_id: WaveId,
        document_id: DocumentId,
        line_count: u32,
        total_quantity: u32,
        occurred_at: DateTime<Utc>,
    },
    WaveReleased {
        warehouse_id: WarehouseId,
        wave_id: WaveId,
        job_ids: Vec<AggregateId>,
        occurred_at: DateTime<Utc>,
    },
    WaveCompleted {
        warehouse_id: WarehouseId,
        wave_id: WaveId,
        occurred_at: DateTime<Utc>,
    },
    WaveCancelled {
        warehouse_id: WarehouseId,
        wave_id: WaveId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for WaveEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WaveEvent::WaveOpened { .. } => "waves.wave.opened",
            WaveEvent::DocumentAdded { .. } => "waves.wave.document_added",
            WaveEvent::WaveReleased { .. } => "waves.wave.released",
            WaveEvent::WaveCompleted { .. } => "waves.wave.completed",
            WaveEvent::WaveCancelled { .. } => "waves.wave.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            WaveEvent::WaveOpened { occurred_at, .. }
            | WaveEvent::DocumentAdded { occurred_at, .. }
            | WaveEvent::WaveReleased { occurred_at, .. }
            | WaveEvent::WaveCompleted { occurred_at, .. }
            | WaveEvent::WaveCancelled { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for Wave {
    type Command = WaveCommand;
    type Event = WaveEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            WaveEvent::WaveOpened {
                warehouse_id,
                wave_id,
                ..
            } => {
                self.id = *wave_id;
                self.warehouse_id = Some(*warehouse_id);
                self.status = WaveStatus::Planning;
                self.created = true;
            }
            WaveEvent::DocumentAdded {
                document_id,
                line_count,
                total_quantity,
                ..
            } => {
                self.documents.push(*document_id);
                self.stats.document_count += 1;
                self.stats.total_lines += line_count;
                self.stats.total_quantity += total_quantity;
            }
            WaveEvent::WaveReleased { job_ids, .. } => {
                self.status = WaveStatus::Released;
                self.job_ids = job_ids.clone();
            }
            WaveEvent::WaveCompleted { .. } => {
                self.status = WaveStatus::Completed;
            }
            WaveEvent::WaveCancelled { .. } => {
                self.status = WaveStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            WaveCommand::OpenWave(cmd) => self.handle_open(cmd),
            WaveCommand::AddDocument(cmd) => self.handle_add_document(cmd),
            WaveCommand::MarkReleased(cmd) => self.handle_mark_released(cmd),
            WaveCommand::MarkCompleted(cmd) => self.handle_mark_completed(cmd),
            WaveCommand::CancelWave(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Wave {
    fn ensure_warehouse(&self, warehouse_id: WarehouseId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.warehouse_id != Some(warehouse_id) {
            return Err(DomainError::invariant("warehouse mismatch"));
        }
        Ok(())
    }

    fn ensure_wave_id(&self, wave_id: WaveId) -> Result<(), DomainError> {
        if self.id != wave_id {
            return Err(DomainError::invariant("wave_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenWave) -> Result<Vec<WaveEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("wave already exists"));
        }

        Ok(vec![WaveEvent::WaveOpened {
            warehouse_id: cmd.warehouse_id,
            wave_id: cmd.wave_id,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_add_document(&self, cmd: &AddDocument) -> Result<Vec<WaveEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_wave_id(cmd.wave_id)?;

        if self.status != WaveStatus::Planning {
            return Err(DomainError::invariant(
                "documents can only be added while planning",
            ));
        }
        if self.documents.contains(&cmd.document_id) {
            return Err(DomainError::conflict("document already in wave"));
        }

        Ok(vec![WaveEvent::DocumentAdded {
            warehouse_id: cmd.warehouse_id,
            wave_id: cmd.wave_id,
            document_id: cmd.document_id,
            line_count: cmd.line_count,
            total_quantity: cmd.total_quantity,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_mark_released(&self, cmd: &MarkReleased) -> Result<Vec<WaveEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_wave_id(cmd.wave_id)?;

        if self.status != WaveStatus::Planning {
            return Err(DomainError::invariant("only planning waves can be released"));
        }
        if self.documents.is_empty() {
            return Err(DomainError::validation("cannot release an empty wave"));
        }

        Ok(vec![WaveEvent::WaveReleased {
            warehouse_id: cmd.warehouse_id,
            wave_id: cmd.wave_id,
            job_ids: cmd.job_ids.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_mark_completed(&self, cmd: &MarkCompleted) -> Result<Vec<WaveEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_wave_id(cmd.wave_id)?;

        if self.status != WaveStatus::Released {
            return Err(DomainError::invariant("only released waves can complete"));
        }

        Ok(vec![WaveEvent::WaveCompleted {
            warehouse_id: cmd.warehouse_id,
            wave_id: cmd.wave_id,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_cancel(&self, cmd: &CancelWave) -> Result<Vec<WaveEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_wave_id(cmd.wave_id)?;

        match self.status {
            WaveStatus::Planning | WaveStatus::Released => {}
            WaveStatus::Completed => {
                return Err(DomainError::invariant("completed waves cannot be cancelled"));
            }
            WaveStatus::Cancelled => {
                return Err(DomainError::conflict("wave already cancelled"));
            }
        }

        Ok(vec![WaveEvent::WaveCancelled {
            warehouse_id: cmd.warehouse_id,
            wave_id: cmd.wave_id,
            reason: cmd.reason.clone(),
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

    fn test_wave_id() -> WaveId {
        WaveId::new(AggregateId::new())
    }

    fn test_document_id() -> DocumentId {
        DocumentId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn apply_all(wave: &mut Wave, events: Vec<WaveEvent>) {
        for e in &events {
            wave.apply(e);
        }
    }

    fn open_wave(warehouse_id: WarehouseId, wave_id: WaveId) -> Wave {
        let mut wave = Wave::empty(wave_id);
        let events = wave
            .handle(&WaveCommand::OpenWave(OpenWave {
                warehouse_id,
                wave_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut wave, events);
        wave
    }

    #[test]
    fn add_document_accumulates_stats() {
        let mut wave = open_wave(test_warehouse_id(), test_wave_id());

        for (lines, qty) in [(2, 7), (3, 11)] {
            let events = wave
                .handle(&WaveCommand::AddDocument(AddDocument {
                    warehouse_id: wave.warehouse_id().unwrap(),
                    wave_id: wave.id_typed(),
                    document_id: test_document_id(),
                    line_count: lines,
                    total_quantity: qty,
                    occurred_at: test_time(),
                }))
                .unwrap();
            apply_all(&mut wave, events);
        }

        let stats = wave.stats();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.total_lines, 5);
        assert_eq!(stats.total_quantity, 18);
    }

    #[test]
    fn cannot_release_empty_wave() {
        let wave = open_wave(test_warehouse_id(), test_wave_id());
        let err = wave
            .handle(&WaveCommand::MarkReleased(MarkReleased {
                warehouse_id: wave.warehouse_id().unwrap(),
                wave_id: wave.id_typed(),
                job_ids: vec![],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn release_then_complete() {
        let mut wave = open_wave(test_warehouse_id(), test_wave_id());
        let events = wave
            .handle(&WaveCommand::AddDocument(AddDocument {
                warehouse_id: wave.warehouse_id().unwrap(),
                wave_id: wave.id_typed(),
                document_id: test_document_id(),
                line_count: 1,
                total_quantity: 4,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut wave, events);

        let job = AggregateId::new();
        let events = wave
            .handle(&WaveCommand::MarkReleased(MarkReleased {
                warehouse_id: wave.warehouse_id().unwrap(),
                wave_id: wave.id_typed(),
                job_ids: vec![job],
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut wave, events);
        assert_eq!(wave.status(), WaveStatus::Released);
        assert_eq!(wave.job_ids(), &[job]);

        // No adding documents after release.
        let err = wave
            .handle(&WaveCommand::AddDocument(AddDocument {
                warehouse_id: wave.warehouse_id().unwrap(),
                wave_id: wave.id_typed(),
                document_id: test_document_id(),
                line_count: 1,
                total_quantity: 1,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let events = wave
            .handle(&WaveCommand::MarkCompleted(MarkCompleted {
                warehouse_id: wave.warehouse_id().unwrap(),
                wave_id: wave.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut wave, events);
        assert_eq!(wave.status(), WaveStatus::Completed);
    }

    #[test]
    fn completed_wave_cannot_be_cancelled() {
        let mut wave = open_wave(test_warehouse_id(), test_wave_id());
        let events = wave
            .handle(&WaveCommand::AddDocument(AddDocument {
                warehouse_id: wave.warehouse_id().unwrap(),
                wave_id: wave.id_typed(),
                document_id: test_document_id(),
                line_count: 1,
                total_quantity: 1,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut wave, events);
        let events = wave
            .handle(&WaveCommand::MarkReleased(MarkReleased {
                warehouse_id: wave.warehouse_id().unwrap(),
                wave_id: wave.id_typed(),
                job_ids: vec![],
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut wave, events);
        let events = wave
            .handle(&WaveCommand::MarkCompleted(MarkCompleted {
                warehouse_id: wave.warehouse_id().unwrap(),
                wave_id: wave.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut wave, events);

        let err = wave
            .handle(&WaveCommand::CancelWave(CancelWave {
                warehouse_id: wave.warehouse_id().unwrap(),
                wave_id: wave.id_typed(),
                reason: "too late".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}

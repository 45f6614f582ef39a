//! Command execution pipeline (application-level orchestration).
//!
//! One consistent execution model for every aggregate:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (warehouse-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events to store (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus (for projections, workers, etc.)
//! ```
//!
//! Warehouse isolation, optimistic concurrency and event ordering are
//! enforced here once, so domain code stays pure. The dispatcher composes
//! the `EventStore` and `EventBus` traits and contains no IO itself.
//!
//! Concurrency: the command's decision runs against the freshly loaded
//! stream, and the append expects exactly that stream version. A concurrent
//! append in the window surfaces as `DispatchError::Concurrency`; callers
//! retry the whole command from scratch, never part of it.
//!
//! Publication happens after a successful append (at-least-once; consumers
//! are idempotent).

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use packwave_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, WarehouseId};
use packwave_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure (e.g. stale aggregate version).
    Concurrency(String),
    /// Warehouse isolation violation (cross-warehouse or cross-aggregate stream mixing).
    WarehouseIsolation(String),
    /// Domain validation failure (deterministic).
    Validation(String),
    /// Domain invariant failure (deterministic).
    InvariantViolation(String),
    /// Domain-level not found.
    NotFound,
    /// Failed to deserialize historical event payloads into the aggregate event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::WarehouseIsolation(msg) => {
                DispatchError::WarehouseIsolation(msg.clone())
            }
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run on the in-memory pair and a
/// persistent pair can be swapped in without touching domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// `make_aggregate` constructs a fresh instance for rehydration (e.g.
    /// `StockLedger::empty(id)`), keeping the dispatcher ignorant of
    /// aggregate construction.
    ///
    /// Returns the committed `StoredEvent`s (with assigned sequence numbers)
    /// on success. A `DispatchError::Concurrency` means another writer won
    /// the append window: reload and re-execute the whole command, or
    /// surface the conflict.
    pub fn dispatch<A>(
        &self,
        warehouse_id: WarehouseId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(WarehouseId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: packwave_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (warehouse-scoped)
        let history = self.store.load_stream(warehouse_id, aggregate_id)?;
        validate_loaded_stream(warehouse_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(warehouse_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    warehouse_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    warehouse_id: WarehouseId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce warehouse isolation even if a buggy backend returns foreign data.
    // Also ensure the stream is monotonically increasing by sequence number.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.warehouse_id != warehouse_id {
            return Err(DispatchError::WarehouseIsolation(format!(
                "loaded stream contains wrong warehouse_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::WarehouseIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

pub(crate) fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

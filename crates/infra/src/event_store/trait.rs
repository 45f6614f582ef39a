use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use packwave_core::{AggregateId, ExpectedVersion, WarehouseId};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a sequence
/// number). Build one from a typed domain event with
/// [`UncommittedEvent::from_typed`], which serializes the payload to JSON and
/// captures the event metadata needed to deserialize it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub warehouse_id: WarehouseId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream.
///
/// Sequence numbers are assigned by the store during append: monotonically
/// increasing, stream-scoped, immutable. They drive ordering, optimistic
/// concurrency and projection idempotency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub warehouse_id: WarehouseId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into a warehouse-scoped envelope for publication.
    pub fn to_envelope(&self) -> packwave_events::EventEnvelope<JsonValue> {
        packwave_events::EventEnvelope::new(
            self.event_id,
            self.warehouse_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Event store operation error (infrastructure-level, not domain-level).
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("warehouse isolation violation: {0}")]
    WarehouseIsolation(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event publication failed: {0}")]
    Publish(String),
}

/// Append-only, warehouse-scoped event store.
///
/// Implementations must:
/// - enforce warehouse isolation (reject cross-warehouse operations)
/// - enforce optimistic concurrency (check version before append)
/// - assign sequence numbers monotonically (no gaps, no duplicates)
/// - ensure atomicity (all events in a batch are persisted or none are)
///
/// The batch atomicity guarantee is what makes an allocation — or a whole
/// wave release — commit as one unit: every reservation of the operation is
/// appended in one `append` call.
pub trait EventStore: Send + Sync {
    /// Append events to an aggregate stream (append-only).
    ///
    /// Implementations must:
    /// - enforce warehouse isolation
    /// - enforce optimistic concurrency against the current stream version
    /// - assign monotonically increasing `sequence_number`s starting at `current_version + 1`
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream for a warehouse + aggregate.
    fn load_stream(
        &self,
        warehouse_id: WarehouseId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(
        &self,
        warehouse_id: WarehouseId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(warehouse_id, aggregate_id)
    }
}

impl UncommittedEvent {
    /// Convenience constructor from a typed domain event.
    ///
    /// Keeps infra decoupled from business, while still capturing event
    /// metadata needed for future deserialization.
    pub fn from_typed<E>(
        warehouse_id: WarehouseId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: packwave_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| EventStoreError::InvalidAppend(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id,
            warehouse_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

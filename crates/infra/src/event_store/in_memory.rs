use std::collections::HashMap;
use std::sync::RwLock;

use packwave_core::{AggregateId, ExpectedVersion, WarehouseId};

use super::query::{EventFilter, EventQuery, EventQueryResult, Pagination};
use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    warehouse_id: WarehouseId,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store.
///
/// Single-process deployments and tests. A persistent backend slots in
/// behind the same `EventStore` trait.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    /// All events for one warehouse (projection rebuilds, queries).
    pub fn warehouse_events(&self, warehouse_id: WarehouseId) -> Vec<StoredEvent> {
        let streams = match self.streams.read() {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        let mut events: Vec<StoredEvent> = streams
            .iter()
            .filter(|(key, _)| key.warehouse_id == warehouse_id)
            .flat_map(|(_, stream)| stream.iter().cloned())
            .collect();
        events.sort_by_key(|e| (*e.aggregate_id.as_uuid(), e.sequence_number));
        events
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        // All events must target the same warehouse + aggregate stream.
        let warehouse_id = events[0].warehouse_id;
        let aggregate_id = events[0].aggregate_id;
        let aggregate_type = events[0].aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.warehouse_id != warehouse_id {
                return Err(EventStoreError::WarehouseIsolation(format!(
                    "batch contains multiple warehouse_ids (index {idx})"
                )));
            }
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let key = StreamKey {
            warehouse_id,
            aggregate_id,
        };

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        let stream = streams.entry(key).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        // Enforce aggregate type stability across the stream.
        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        // Assign sequence numbers and append (append-only).
        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                warehouse_id: e.warehouse_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        warehouse_id: WarehouseId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            warehouse_id,
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl EventQuery for InMemoryEventStore {
    async fn query_events(
        &self,
        warehouse_id: WarehouseId,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, EventStoreError> {
        let mut events: Vec<StoredEvent> = self
            .warehouse_events(warehouse_id)
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();

        // Newest first for inspection; sequence order within a timestamp.
        events.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| a.sequence_number.cmp(&b.sequence_number))
        });

        let total = events.len() as u64;
        let start = (pagination.offset as usize).min(events.len());
        let end = (start + pagination.limit as usize).min(events.len());
        let page = events[start..end].to_vec();
        let has_more = (end as u64) < total;

        Ok(EventQueryResult {
            events: page,
            total,
            pagination,
            has_more,
        })
    }

    async fn get_event_by_id(
        &self,
        warehouse_id: WarehouseId,
        event_id: uuid::Uuid,
    ) -> Result<Option<StoredEvent>, EventStoreError> {
        Ok(self
            .warehouse_events(warehouse_id)
            .into_iter()
            .find(|e| e.event_id == event_id))
    }
}

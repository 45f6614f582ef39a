//! Append-only event storage.
//!
//! One stream per aggregate instance, keyed by `(warehouse_id, aggregate_id)`.
//! The store is the source of truth *and* the audit trail: commit/release
//! events carry actor and before/after quantities, and the query interface
//! exposes them read-only.

mod in_memory;
mod query;
mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use query::{EventFilter, EventQuery, EventQueryResult, Pagination};
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

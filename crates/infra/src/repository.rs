//! Read-side aggregate loading.
//!
//! The allocation engine plans against fully rehydrated aggregates, not
//! against read models: projections may lag, streams do not. This is the
//! load+rehydrate half of the dispatcher's pipeline, exposed on its own.

use serde::de::DeserializeOwned;

use packwave_core::{Aggregate, AggregateId, DomainError, WarehouseId};

use crate::command_dispatcher::{apply_history, DispatchError};
use crate::event_store::EventStore;

/// Load and rehydrate one aggregate from its stream.
///
/// Returns the aggregate alongside its stream version, so a caller that
/// plans on this state can detect interleaving writers when it later
/// dispatches (the dispatcher re-loads and expects the then-current
/// version; any drift surfaces as a concurrency conflict).
pub fn load_aggregate<A, S>(
    store: &S,
    warehouse_id: WarehouseId,
    aggregate_id: AggregateId,
    make_aggregate: impl FnOnce(WarehouseId, AggregateId) -> A,
) -> Result<(A, u64), DispatchError>
where
    A: Aggregate<Error = DomainError>,
    A::Event: DeserializeOwned,
    S: EventStore,
{
    let history = store.load_stream(warehouse_id, aggregate_id)?;
    let version = history.last().map(|e| e.sequence_number).unwrap_or(0);

    let mut aggregate = make_aggregate(warehouse_id, aggregate_id);
    apply_history::<A>(&mut aggregate, &history)?;

    Ok((aggregate, version))
}

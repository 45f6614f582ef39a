use std::sync::Arc;
use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use packwave_core::{AggregateId, DomainError, WarehouseId};
use packwave_demand::DocumentId;
use packwave_engine::AllocationEngine;
use packwave_events::{EventBus, EventEnvelope, InMemoryEventBus};
use packwave_infra::{
    command_dispatcher::DispatchError,
    event_store::{EventFilter, EventQuery, EventQueryResult, InMemoryEventStore, Pagination, StoredEvent},
    projections::{
        atp::{AtpReadModel, AtpView},
        demand_documents::{DemandDocumentReadModel, DemandDocumentsProjection},
        picking_jobs::{PickingJobReadModel, PickingJobsProjection},
        product_catalog::{ProductCatalogProjection, ProductReadModel},
        stock_levels::{StockLevelReadModel, StockLevelsProjection},
        waves::{WaveReadModel, WavesProjection},
    },
    read_model::InMemoryWarehouseStore,
};
use packwave_picking::JobId;
use packwave_products::ProductId;
use packwave_waves::WaveId;

/// Realtime message broadcasted via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub warehouse_id: WarehouseId,
    pub topic: String,
    pub payload: serde_json::Value,
}

type Bus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;
type Store = Arc<InMemoryEventStore>;

pub type ApiEngine = AllocationEngine<Store, Bus>;

type ProductStore = Arc<InMemoryWarehouseStore<ProductId, ProductReadModel>>;
type StockStore = Arc<InMemoryWarehouseStore<ProductId, StockLevelReadModel>>;
type DemandStore = Arc<InMemoryWarehouseStore<DocumentId, DemandDocumentReadModel>>;
type WaveStore = Arc<InMemoryWarehouseStore<WaveId, WaveReadModel>>;
type JobStore = Arc<InMemoryWarehouseStore<JobId, PickingJobReadModel>>;

/// Application service container: engine, store, projections, realtime.
pub struct AppServices {
    engine: Arc<ApiEngine>,
    event_store: Store,
    products_projection: Arc<ProductCatalogProjection<ProductStore>>,
    stock_projection: Arc<StockLevelsProjection<StockStore>>,
    demand_projection: Arc<DemandDocumentsProjection<DemandStore>>,
    waves_projection: Arc<WavesProjection<WaveStore>>,
    picking_projection: Arc<PickingJobsProjection<JobStore>>,
    atp_view: Arc<AtpView<StockStore, DemandStore>>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
}

pub fn build_services() -> AppServices {
    // In-memory infra wiring: store + bus + engine + projections.
    let store: Store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let engine = Arc::new(AllocationEngine::new(store.clone(), bus.clone()));

    let products_projection = Arc::new(ProductCatalogProjection::new(Arc::new(
        InMemoryWarehouseStore::new(),
    )));
    let stock_store: StockStore = Arc::new(InMemoryWarehouseStore::new());
    let stock_projection = Arc::new(StockLevelsProjection::new(stock_store));
    let demand_store: DemandStore = Arc::new(InMemoryWarehouseStore::new());
    let demand_projection = Arc::new(DemandDocumentsProjection::new(demand_store));
    let waves_projection = Arc::new(WavesProjection::new(Arc::new(InMemoryWarehouseStore::new())));
    let picking_projection = Arc::new(PickingJobsProjection::new(Arc::new(
        InMemoryWarehouseStore::new(),
    )));
    let atp_view = Arc::new(AtpView::new(
        stock_projection.clone(),
        demand_projection.clone(),
    ));

    // Realtime channel (SSE): lossy broadcast, warehouse-filtered in handlers.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    // Background subscriber: bus -> projections.
    {
        let sub = bus.subscribe();
        let products_projection = products_projection.clone();
        let stock_projection = stock_projection.clone();
        let demand_projection = demand_projection.clone();
        let waves_projection = waves_projection.clone();
        let picking_projection = picking_projection.clone();
        let realtime_tx = realtime_tx.clone();
        tokio::task::spawn_blocking(move || {
            loop {
                match sub.recv() {
                    Ok(env) => {
                        let at = env.aggregate_type();

                        // Apply to the relevant projection only.
                        let apply_ok = match at {
                            "products.product" => {
                                products_projection.apply_envelope(&env).map_err(|e| e.to_string())
                            }
                            "stock.ledger" => {
                                stock_projection.apply_envelope(&env).map_err(|e| e.to_string())
                            }
                            "demand.document" => {
                                demand_projection.apply_envelope(&env).map_err(|e| e.to_string())
                            }
                            "waves.wave" => {
                                waves_projection.apply_envelope(&env).map_err(|e| e.to_string())
                            }
                            "picking.job" => {
                                picking_projection.apply_envelope(&env).map_err(|e| e.to_string())
                            }
                            _ => Ok(()),
                        };

                        if let Err(e) = apply_ok {
                            tracing::warn!("projection apply failed: {e}");
                            continue;
                        }

                        // Broadcast projection update (lossy; no backpressure on core).
                        let _ = realtime_tx.send(RealtimeMessage {
                            warehouse_id: env.warehouse_id(),
                            topic: format!("{at}.projection_updated"),
                            payload: serde_json::json!({
                                "kind": "projection_update",
                                "aggregate_type": at,
                                "aggregate_id": env.aggregate_id().to_string(),
                                "sequence_number": env.sequence_number(),
                            }),
                        });
                    }
                    Err(_) => break,
                }
            }
        });
    }

    AppServices {
        engine,
        event_store: store,
        products_projection,
        stock_projection,
        demand_projection,
        waves_projection,
        picking_projection,
        atp_view,
        realtime_tx,
    }
}

impl AppServices {
    pub fn engine(&self) -> &Arc<ApiEngine> {
        &self.engine
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }

    pub fn dispatch<A>(
        &self,
        warehouse_id: WarehouseId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(WarehouseId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: packwave_core::Aggregate<Error = DomainError>,
        A::Event: packwave_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        self.engine.dispatcher().dispatch::<A>(
            warehouse_id,
            aggregate_id,
            aggregate_type,
            command,
            make_aggregate,
        )
    }

    pub fn products_get(
        &self,
        warehouse_id: WarehouseId,
        product_id: &ProductId,
    ) -> Option<ProductReadModel> {
        self.products_projection.get(warehouse_id, product_id)
    }

    pub fn products_list(&self, warehouse_id: WarehouseId) -> Vec<ProductReadModel> {
        self.products_projection.list(warehouse_id)
    }

    pub fn stock_levels_list(&self, warehouse_id: WarehouseId) -> Vec<StockLevelReadModel> {
        self.stock_projection.list(warehouse_id)
    }

    pub fn atp_get(&self, warehouse_id: WarehouseId, product_id: ProductId) -> AtpReadModel {
        self.atp_view.get(warehouse_id, product_id)
    }

    pub fn atp_list(&self, warehouse_id: WarehouseId) -> Vec<AtpReadModel> {
        self.atp_view.list(warehouse_id)
    }

    pub fn documents_get(
        &self,
        warehouse_id: WarehouseId,
        document_id: &DocumentId,
    ) -> Option<DemandDocumentReadModel> {
        self.demand_projection.get(warehouse_id, document_id)
    }

    pub fn documents_list(&self, warehouse_id: WarehouseId) -> Vec<DemandDocumentReadModel> {
        self.demand_projection.list(warehouse_id)
    }

    pub fn waves_get(&self, warehouse_id: WarehouseId, wave_id: &WaveId) -> Option<WaveReadModel> {
        self.waves_projection.get(warehouse_id, wave_id)
    }

    pub fn waves_list(&self, warehouse_id: WarehouseId) -> Vec<WaveReadModel> {
        self.waves_projection.list(warehouse_id)
    }

    pub fn picking_jobs_get(
        &self,
        warehouse_id: WarehouseId,
        job_id: &JobId,
    ) -> Option<PickingJobReadModel> {
        self.picking_projection.get(warehouse_id, job_id)
    }

    pub fn picking_jobs_list(&self, warehouse_id: WarehouseId) -> Vec<PickingJobReadModel> {
        self.picking_projection.list(warehouse_id)
    }

    /// Query audit events with filters and pagination.
    pub async fn query_events(
        &self,
        warehouse_id: WarehouseId,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, packwave_infra::event_store::EventStoreError> {
        self.event_store
            .query_events(warehouse_id, filter, pagination)
            .await
    }

    /// Get a single audit event by its ID.
    pub async fn get_event_by_id(
        &self,
        warehouse_id: WarehouseId,
        event_id: uuid::Uuid,
    ) -> Result<Option<StoredEvent>, packwave_infra::event_store::EventStoreError> {
        self.event_store.get_event_by_id(warehouse_id, event_id).await
    }
}

/// Build an SSE stream for a warehouse (used by `/stream`).
pub fn warehouse_sse_stream(
    services: Arc<AppServices>,
    warehouse_id: WarehouseId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.warehouse_id == warehouse_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

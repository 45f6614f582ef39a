use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use packwave_core::AggregateId;
use packwave_products::ProductId;
use packwave_stock::{
    LedgerId, OpenLedger, ReceiveStock, RegisterStorageUnit, StockLedger, StockLedgerCommand,
    StorageUnitId, Zone,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::WarehouseContext;

pub fn router() -> Router {
    Router::new()
        .route("/ledger", post(open_ledger))
        .route("/units", post(register_unit))
        .route("/units/:id/receive", post(receive_stock))
        .route("/levels", get(list_levels))
        .route("/atp", get(list_atp))
        .route("/atp/:product_id", get(get_atp))
}

fn dispatch_ledger(
    services: &AppServices,
    ctx: &WarehouseContext,
    cmd: StockLedgerCommand,
) -> Result<usize, axum::response::Response> {
    let ledger_id = LedgerId::for_warehouse(ctx.warehouse_id());
    services
        .dispatch::<StockLedger>(
            ctx.warehouse_id(),
            ledger_id.0,
            "stock.ledger",
            cmd,
            |_warehouse_id, aggregate_id| StockLedger::empty(LedgerId::new(aggregate_id)),
        )
        .map(|committed| committed.len())
        .map_err(errors::dispatch_error_to_response)
}

/// Open the warehouse's stock ledger (first-time setup).
pub async fn open_ledger(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
) -> axum::response::Response {
    let ledger_id = LedgerId::for_warehouse(ctx.warehouse_id());
    let cmd = StockLedgerCommand::OpenLedger(OpenLedger {
        warehouse_id: ctx.warehouse_id(),
        ledger_id,
        occurred_at: Utc::now(),
    });

    match dispatch_ledger(&services, &ctx, cmd) {
        Ok(_) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "ledger_id": ledger_id.to_string() })),
        )
            .into_response(),
        Err(response) => response,
    }
}

pub async fn register_unit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Json(body): Json<dto::RegisterStorageUnitRequest>,
) -> axum::response::Response {
    let unit_id = StorageUnitId::new(AggregateId::new());
    let cmd = StockLedgerCommand::RegisterStorageUnit(RegisterStorageUnit {
        warehouse_id: ctx.warehouse_id(),
        ledger_id: LedgerId::for_warehouse(ctx.warehouse_id()),
        storage_unit_id: unit_id,
        zone: Zone::new(body.zone),
        occurred_at: Utc::now(),
    });

    match dispatch_ledger(&services, &ctx, cmd) {
        Ok(_) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": unit_id.to_string() })),
        )
            .into_response(),
        Err(response) => response,
    }
}

pub async fn receive_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReceiveStockRequest>,
) -> axum::response::Response {
    let unit_agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid unit id"),
    };
    let product_agg: AggregateId = match body.product_id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id");
        }
    };

    let cmd = StockLedgerCommand::ReceiveStock(ReceiveStock {
        warehouse_id: ctx.warehouse_id(),
        ledger_id: LedgerId::for_warehouse(ctx.warehouse_id()),
        storage_unit_id: StorageUnitId::new(unit_agg),
        product_id: ProductId::new(product_agg),
        quantity: body.quantity,
        occurred_at: Utc::now(),
    });

    match dispatch_ledger(&services, &ctx, cmd) {
        Ok(events_committed) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": unit_agg.to_string(),
                "events_committed": events_committed,
            })),
        )
            .into_response(),
        Err(response) => response,
    }
}

pub async fn list_levels(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
) -> axum::response::Response {
    let levels: Vec<_> = services
        .stock_levels_list(ctx.warehouse_id())
        .into_iter()
        .map(dto::stock_level_to_json)
        .collect();

    (StatusCode::OK, Json(serde_json::json!({ "levels": levels }))).into_response()
}

/// Advisory ATP for the whole catalog. Display-only; the engine re-checks
/// availability on every commit.
pub async fn list_atp(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
) -> axum::response::Response {
    let atp: Vec<_> = services
        .atp_list(ctx.warehouse_id())
        .into_iter()
        .map(dto::atp_to_json)
        .collect();

    (StatusCode::OK, Json(serde_json::json!({ "atp": atp }))).into_response()
}

pub async fn get_atp(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(product_id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match product_id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };

    let atp = services.atp_get(ctx.warehouse_id(), ProductId::new(agg));
    (StatusCode::OK, Json(dto::atp_to_json(atp))).into_response()
}

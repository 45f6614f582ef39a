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
use packwave_products::{
    ArchiveProduct, CreateProduct, Product, ProductCommand, ProductId,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::WarehouseContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/:id", get(get_product))
        .route("/:id/archive", post(archive_product))
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    let agg = AggregateId::new();
    let product_id = ProductId::new(agg);

    let cmd = ProductCommand::CreateProduct(CreateProduct {
        warehouse_id: ctx.warehouse_id(),
        product_id,
        sku: body.sku,
        name: body.name,
        barcode: body.barcode,
        occurred_at: Utc::now(),
    });

    let committed = match services.dispatch::<Product>(
        ctx.warehouse_id(),
        agg,
        "products.product",
        cmd,
        |_warehouse_id, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
) -> axum::response::Response {
    let products: Vec<_> = services
        .products_list(ctx.warehouse_id())
        .into_iter()
        .map(dto::product_to_json)
        .collect();

    (StatusCode::OK, Json(serde_json::json!({ "products": products }))).into_response()
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };

    match services.products_get(ctx.warehouse_id(), &ProductId::new(agg)) {
        Some(rm) => (StatusCode::OK, Json(dto::product_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
    }
}

pub async fn archive_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };

    let cmd = ProductCommand::ArchiveProduct(ArchiveProduct {
        warehouse_id: ctx.warehouse_id(),
        product_id: ProductId::new(agg),
        occurred_at: Utc::now(),
    });

    match services.dispatch::<Product>(
        ctx.warehouse_id(),
        agg,
        "products.product",
        cmd,
        |_warehouse_id, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
    ) {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

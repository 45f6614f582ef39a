use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::services::{warehouse_sse_stream, AppServices};
use crate::context::WarehouseContext;

pub async fn health() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

/// Server-sent events stream of projection updates for one warehouse.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
) -> impl IntoResponse {
    warehouse_sse_stream(services, ctx.warehouse_id())
}

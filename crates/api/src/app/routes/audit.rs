use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use packwave_core::AggregateId;
use packwave_infra::event_store::{EventFilter, Pagination, StoredEvent};

use crate::app::dto;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::WarehouseContext;

pub fn router() -> Router {
    Router::new()
        .route("/events", get(query_events))
        .route("/events/:event_id", get(get_event))
}

fn event_to_json(event: &StoredEvent) -> serde_json::Value {
    serde_json::json!({
        "event_id": event.event_id.to_string(),
        "aggregate_id": event.aggregate_id.to_string(),
        "aggregate_type": event.aggregate_type,
        "sequence_number": event.sequence_number,
        "event_type": event.event_type,
        "occurred_at": event.occurred_at,
        "payload": event.payload,
    })
}

/// The commit/release audit trail: filtered, paginated, read-only.
pub async fn query_events(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Query(query): Query<dto::AuditQuery>,
) -> axum::response::Response {
    let aggregate_id = match &query.aggregate_id {
        Some(raw) => match raw.parse::<AggregateId>() {
            Ok(agg) => Some(agg),
            Err(_) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_id",
                    "invalid aggregate id",
                );
            }
        },
        None => None,
    };

    let filter = EventFilter {
        aggregate_id,
        aggregate_type: query.aggregate_type.clone(),
        event_type: query.event_type.clone(),
        occurred_after: None,
        occurred_before: None,
    };
    let pagination = Pagination::new(query.limit, query.offset);

    match services
        .query_events(ctx.warehouse_id(), filter, pagination)
        .await
    {
        Ok(result) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "events": result.events.iter().map(event_to_json).collect::<Vec<_>>(),
                "total": result.total,
                "has_more": result.has_more,
            })),
        )
            .into_response(),
        Err(e) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
    }
}

pub async fn get_event(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(event_id): Path<String>,
) -> axum::response::Response {
    let event_id: uuid::Uuid = match event_id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid event id"),
    };

    match services.get_event_by_id(ctx.warehouse_id(), event_id).await {
        Ok(Some(event)) => (StatusCode::OK, Json(event_to_json(&event))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "event not found"),
        Err(e) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
    }
}

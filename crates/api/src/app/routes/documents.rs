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
use packwave_demand::{
    AddLine, AddStorageUnit, ApproveDocument, DemandCategory, DemandDocument,
    DemandDocumentCommand, DemandKind, DocumentId, MarkShipped, OpenDocument,
};
use packwave_products::ProductId;
use packwave_stock::StorageUnitId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::WarehouseContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(open_document).get(list_documents))
        .route("/:id", get(get_document))
        .route("/:id/lines", post(add_line))
        .route("/:id/units", post(add_storage_unit))
        .route("/:id/approve", post(approve))
        .route("/:id/allocate", post(allocate))
        .route("/:id/cancel", post(cancel))
        .route("/:id/ship", post(ship))
}

fn parse_document_id(id: &str) -> Result<DocumentId, axum::response::Response> {
    id.parse::<AggregateId>()
        .map(DocumentId::new)
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid document id"))
}

fn dispatch_document(
    services: &AppServices,
    ctx: &WarehouseContext,
    document_id: DocumentId,
    cmd: DemandDocumentCommand,
) -> Result<usize, axum::response::Response> {
    services
        .dispatch::<DemandDocument>(
            ctx.warehouse_id(),
            document_id.0,
            "demand.document",
            cmd,
            |_warehouse_id, aggregate_id| DemandDocument::empty(DocumentId::new(aggregate_id)),
        )
        .map(|committed| committed.len())
        .map_err(errors::dispatch_error_to_response)
}

pub async fn open_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Json(body): Json<dto::OpenDocumentRequest>,
) -> axum::response::Response {
    let category = match body.category.as_str() {
        "order" => DemandCategory::Order,
        "transfer" => DemandCategory::Transfer,
        _ => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_category",
                "category must be one of: order, transfer",
            );
        }
    };
    let kind = match body.kind.as_str() {
        "item" => DemandKind::Item,
        "storage_unit" => DemandKind::StorageUnit,
        _ => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_kind",
                "kind must be one of: item, storage_unit",
            );
        }
    };

    let document_id = DocumentId::new(AggregateId::new());
    let cmd = DemandDocumentCommand::OpenDocument(OpenDocument {
        warehouse_id: ctx.warehouse_id(),
        document_id,
        category,
        kind,
        occurred_at: Utc::now(),
    });

    match dispatch_document(&services, &ctx, document_id, cmd) {
        Ok(_) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": document_id.to_string() })),
        )
            .into_response(),
        Err(response) => response,
    }
}

/// Add an item line. The response carries the advisory ATP for the product
/// so authoring UIs can warn while the user types; the figure is not a
/// promise — allocation re-checks.
pub async fn add_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddLineRequest>,
) -> axum::response::Response {
    let document_id = match parse_document_id(&id) {
        Ok(v) => v,
        Err(response) => return response,
    };
    let product_agg: AggregateId = match body.product_id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id");
        }
    };
    let product_id = ProductId::new(product_agg);

    let cmd = DemandDocumentCommand::AddLine(AddLine {
        warehouse_id: ctx.warehouse_id(),
        document_id,
        product_id,
        quantity: body.quantity,
        occurred_at: Utc::now(),
    });

    match dispatch_document(&services, &ctx, document_id, cmd) {
        Ok(_) => {
            let atp = services.atp_get(ctx.warehouse_id(), product_id);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "id": document_id.to_string(),
                    "atp": dto::atp_to_json(atp),
                })),
            )
                .into_response()
        }
        Err(response) => response,
    }
}

pub async fn add_storage_unit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddStorageUnitRequest>,
) -> axum::response::Response {
    let document_id = match parse_document_id(&id) {
        Ok(v) => v,
        Err(response) => return response,
    };
    let unit_agg: AggregateId = match body.storage_unit_id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid unit id"),
    };

    let cmd = DemandDocumentCommand::AddStorageUnit(AddStorageUnit {
        warehouse_id: ctx.warehouse_id(),
        document_id,
        storage_unit_id: StorageUnitId::new(unit_agg),
        occurred_at: Utc::now(),
    });

    match dispatch_document(&services, &ctx, document_id, cmd) {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": document_id.to_string() })),
        )
            .into_response(),
        Err(response) => response,
    }
}

pub async fn approve(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let document_id = match parse_document_id(&id) {
        Ok(v) => v,
        Err(response) => return response,
    };

    let cmd = DemandDocumentCommand::ApproveDocument(ApproveDocument {
        warehouse_id: ctx.warehouse_id(),
        document_id,
        occurred_at: Utc::now(),
    });

    match dispatch_document(&services, &ctx, document_id, cmd) {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": document_id.to_string(), "approved": true })),
        )
            .into_response(),
        Err(response) => response,
    }
}

pub async fn allocate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let document_id = match parse_document_id(&id) {
        Ok(v) => v,
        Err(response) => return response,
    };

    match services
        .engine()
        .allocate(ctx.warehouse_id(), document_id, ctx.actor())
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "jobsCreated": outcome.job_ids.len(),
                "alreadyAllocated": outcome.already_allocated,
                "jobIds": outcome.job_ids.iter().map(|j| j.to_string()).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::allocation_error_to_response(e),
    }
}

pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelRequest>,
) -> axum::response::Response {
    let document_id = match parse_document_id(&id) {
        Ok(v) => v,
        Err(response) => return response,
    };

    match services
        .engine()
        .cancel_document(ctx.warehouse_id(), document_id, &body.reason, ctx.actor())
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": document_id.to_string(),
                "outcome": format!("{outcome:?}"),
            })),
        )
            .into_response(),
        Err(e) => errors::allocation_error_to_response(e),
    }
}

pub async fn ship(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let document_id = match parse_document_id(&id) {
        Ok(v) => v,
        Err(response) => return response,
    };

    let cmd = DemandDocumentCommand::MarkShipped(MarkShipped {
        warehouse_id: ctx.warehouse_id(),
        document_id,
        occurred_at: Utc::now(),
    });

    match dispatch_document(&services, &ctx, document_id, cmd) {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": document_id.to_string(), "status": "shipped" })),
        )
            .into_response(),
        Err(response) => response,
    }
}

pub async fn list_documents(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
) -> axum::response::Response {
    let documents: Vec<_> = services
        .documents_list(ctx.warehouse_id())
        .into_iter()
        .map(dto::document_to_json)
        .collect();

    (
        StatusCode::OK,
        Json(serde_json::json!({ "documents": documents })),
    )
        .into_response()
}

pub async fn get_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let document_id = match parse_document_id(&id) {
        Ok(v) => v,
        Err(response) => return response,
    };

    match services.documents_get(ctx.warehouse_id(), &document_id) {
        Some(rm) => (StatusCode::OK, Json(dto::document_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "document not found"),
    }
}

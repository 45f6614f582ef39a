use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use packwave_core::AggregateId;
use packwave_demand::{DemandKind, DocumentId};
use packwave_waves::{ClusterCandidate, ClusterParams, WaveId, suggest_clusters};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::WarehouseContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_wave).get(list_waves))
        .route("/suggestions", get(suggestions))
        .route("/:id", get(get_wave))
        .route("/:id/release", post(release_wave))
        .route("/:id/cancel", post(cancel_wave))
}

fn parse_wave_id(id: &str) -> Result<WaveId, axum::response::Response> {
    id.parse::<AggregateId>()
        .map(WaveId::new)
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid wave id"))
}

/// Advisory clustering over eligible documents (approved, pending,
/// unassigned, item-kind). Proposes only; creating a wave is explicit.
pub async fn suggestions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Query(query): Query<dto::ClusterQuery>,
) -> axum::response::Response {
    let candidates: Vec<ClusterCandidate> = services
        .documents_list(ctx.warehouse_id())
        .into_iter()
        .filter(|doc| doc.is_cluster_candidate() && doc.kind == DemandKind::Item)
        .map(|doc| ClusterCandidate {
            document_id: doc.document_id,
            products: doc.requested.keys().copied().collect(),
            line_count: doc.line_count(),
        })
        .collect();

    let params = ClusterParams {
        min_similarity: query.min_similarity.unwrap_or(0.3),
        max_documents: query.max_orders.unwrap_or(10),
    };
    let clusters = suggest_clusters(&candidates, &params);

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "candidates": candidates.len(),
            "clusters": clusters.iter().map(dto::cluster_to_json).collect::<Vec<_>>(),
        })),
    )
        .into_response()
}

pub async fn create_wave(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Json(body): Json<dto::CreateWaveRequest>,
) -> axum::response::Response {
    let mut document_ids = Vec::with_capacity(body.document_ids.len());
    for raw in &body.document_ids {
        match raw.parse::<AggregateId>() {
            Ok(agg) => document_ids.push(DocumentId::new(agg)),
            Err(_) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_id",
                    format!("invalid document id: {raw}"),
                );
            }
        }
    }

    match services.engine().create_wave(ctx.warehouse_id(), &document_ids) {
        Ok(wave_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": wave_id.to_string() })),
        )
            .into_response(),
        Err(e) => errors::allocation_error_to_response(e),
    }
}

pub async fn release_wave(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let wave_id = match parse_wave_id(&id) {
        Ok(v) => v,
        Err(response) => return response,
    };

    match services
        .engine()
        .release_wave(ctx.warehouse_id(), wave_id, ctx.actor())
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "jobsCreated": outcome.job_ids.len(),
                "documents": outcome
                    .documents
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>(),
                "jobIds": outcome.job_ids.iter().map(|j| j.to_string()).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::allocation_error_to_response(e),
    }
}

pub async fn cancel_wave(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelRequest>,
) -> axum::response::Response {
    let wave_id = match parse_wave_id(&id) {
        Ok(v) => v,
        Err(response) => return response,
    };

    match services
        .engine()
        .cancel_wave(ctx.warehouse_id(), wave_id, &body.reason, ctx.actor())
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": wave_id.to_string(),
                "documentsUnassigned": outcome.documents_unassigned,
                "documentsRolledBack": outcome.documents_rolled_back,
            })),
        )
            .into_response(),
        Err(e) => errors::allocation_error_to_response(e),
    }
}

pub async fn list_waves(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
) -> axum::response::Response {
    let waves: Vec<_> = services
        .waves_list(ctx.warehouse_id())
        .into_iter()
        .map(dto::wave_to_json)
        .collect();

    (StatusCode::OK, Json(serde_json::json!({ "waves": waves }))).into_response()
}

pub async fn get_wave(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let wave_id = match parse_wave_id(&id) {
        Ok(v) => v,
        Err(response) => return response,
    };

    match services.waves_get(ctx.warehouse_id(), &wave_id) {
        Some(rm) => (StatusCode::OK, Json(dto::wave_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "wave not found"),
    }
}

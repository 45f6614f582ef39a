use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use packwave_core::{AggregateId, UserId};
use packwave_picking::{AssignPicker, JobId, PickingJob, PickingJobCommand, TaskId};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::WarehouseContext;

pub fn router() -> Router {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/assign", post(assign_picker))
        .route("/jobs/:id/tasks/:task_id/picked", post(mark_task_picked))
}

fn parse_job_id(id: &str) -> Result<JobId, axum::response::Response> {
    id.parse::<AggregateId>()
        .map(JobId::new)
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"))
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
) -> axum::response::Response {
    let jobs: Vec<_> = services
        .picking_jobs_list(ctx.warehouse_id())
        .into_iter()
        .map(dto::picking_job_to_json)
        .collect();

    (StatusCode::OK, Json(serde_json::json!({ "jobs": jobs }))).into_response()
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(response) => return response,
    };

    match services.picking_jobs_get(ctx.warehouse_id(), &job_id) {
        Some(rm) => (StatusCode::OK, Json(dto::picking_job_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
    }
}

pub async fn assign_picker(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AssignPickerRequest>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(response) => return response,
    };
    let picker_uuid: uuid::Uuid = match body.picker_id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid picker id"),
    };

    let cmd = PickingJobCommand::AssignPicker(AssignPicker {
        warehouse_id: ctx.warehouse_id(),
        job_id,
        picker: UserId::from_uuid(picker_uuid),
        occurred_at: Utc::now(),
    });

    match services.dispatch::<PickingJob>(
        ctx.warehouse_id(),
        job_id.0,
        "picking.job",
        cmd,
        |_warehouse_id, aggregate_id| PickingJob::empty(JobId::new(aggregate_id)),
    ) {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": job_id.to_string() })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// Picker-facing task completion — the only externally visible mutation of
/// a task's status. Routed through the engine so it cannot interleave with
/// a concurrent cancellation.
pub async fn mark_task_picked(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<WarehouseContext>,
    Path((id, task_id)): Path<(String, String)>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(response) => return response,
    };
    let task_agg: AggregateId = match task_id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid task id"),
    };

    match services.engine().mark_task_picked(
        ctx.warehouse_id(),
        job_id,
        TaskId::new(task_agg),
        ctx.actor(),
    ) {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "jobCompleted": outcome.job_completed,
                "documentPicked": outcome.document_picked.map(|d| d.to_string()),
                "waveCompleted": outcome.wave_completed.map(|w| w.to_string()),
            })),
        )
            .into_response(),
        Err(e) => errors::allocation_error_to_response(e),
    }
}

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use packwave_engine::AllocationError;
use packwave_infra::command_dispatcher::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
        DispatchError::WarehouseIsolation(msg) => {
            json_error(StatusCode::FORBIDDEN, "warehouse_isolation", msg)
        }
    }
}

/// Engine errors: shortage is the expected outcome and renders as an
/// actionable report, not a generic error body.
pub fn allocation_error_to_response(err: AllocationError) -> axum::response::Response {
    match err {
        AllocationError::Shortage(report) => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "success": false,
                "reason": "SHORTAGE",
                "missingItems": report
                    .items
                    .iter()
                    .map(|i| json!({
                        "sku": i.sku,
                        "name": i.name,
                        "needed": i.needed,
                        "available": i.available,
                        "missing": i.missing,
                    }))
                    .collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        AllocationError::DocumentNotFound | AllocationError::WaveNotFound => {
            json_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        AllocationError::NotApproved => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "not_approved", err.to_string())
        }
        AllocationError::DocumentInWave => {
            json_error(StatusCode::CONFLICT, "document_in_wave", err.to_string())
        }
        AllocationError::PickedWorkExists => {
            json_error(StatusCode::CONFLICT, "picked_work_exists", err.to_string())
        }
        AllocationError::InvalidState(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_state", msg)
        }
        AllocationError::ConcurrentConflict(msg) => {
            json_error(StatusCode::CONFLICT, "concurrent_conflict", msg)
        }
        AllocationError::InsufficientPhysicalStock(msg) => {
            json_error(StatusCode::CONFLICT, "insufficient_physical_stock", msg)
        }
        AllocationError::OverRelease(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "over_release", msg)
        }
        AllocationError::Internal(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

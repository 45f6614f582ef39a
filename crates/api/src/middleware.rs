//! Request middleware: warehouse scoping.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use packwave_core::{UserId, WarehouseId};

use crate::app::errors;
use crate::context::WarehouseContext;

pub const WAREHOUSE_HEADER: &str = "x-warehouse-id";
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Extract the warehouse scope (required) and actor identity (optional)
/// from request headers and stash them as a `WarehouseContext` extension.
pub async fn warehouse_context_middleware(mut request: Request, next: Next) -> Response {
    let warehouse_id = match header_uuid(&request, WAREHOUSE_HEADER) {
        Ok(Some(uuid)) => WarehouseId::from_uuid(uuid),
        Ok(None) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "missing_warehouse",
                format!("{WAREHOUSE_HEADER} header is required"),
            )
            .into_response();
        }
        Err(response) => return response,
    };

    let actor = match header_uuid(&request, ACTOR_HEADER) {
        Ok(Some(uuid)) => UserId::from_uuid(uuid),
        Ok(None) => UserId::from_uuid(Uuid::nil()),
        Err(response) => return response,
    };

    request
        .extensions_mut()
        .insert(WarehouseContext::new(warehouse_id, actor));

    next.run(request).await
}

fn header_uuid(request: &Request, name: &str) -> Result<Option<Uuid>, Response> {
    let Some(value) = request.headers().get(name) else {
        return Ok(None);
    };
    let text = value.to_str().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_header",
            format!("{name} is not valid UTF-8"),
        )
        .into_response()
    })?;
    let uuid = Uuid::parse_str(text).map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_header",
            format!("{name} is not a valid UUID"),
        )
        .into_response()
    })?;
    Ok(Some(uuid))
}

//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (event store/bus, engine, projections)
//! - `routes/`: HTTP routes + handlers (one file per domain area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app() -> Router {
    let services = Arc::new(services::build_services());

    // Warehouse-scoped routes: require the warehouse header. The context
    // middleware runs outermost, so every handler sees a WarehouseContext.
    let scoped = routes::router().layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn(
                middleware::warehouse_context_middleware,
            ))
            .layer(Extension(services)),
    );

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(scoped)
}

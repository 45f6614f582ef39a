use axum::{Router, routing::get};

pub mod audit;
pub mod documents;
pub mod picking;
pub mod products;
pub mod stock;
pub mod system;
pub mod waves;

/// Warehouse-scoped routing tree.
pub fn router() -> Router {
    Router::new()
        .nest("/products", products::router())
        .nest("/stock", stock::router())
        .nest("/documents", documents::router())
        .nest("/waves", waves::router())
        .nest("/picking", picking::router())
        .nest("/audit", audit::router())
        .route("/stream", get(system::stream))
}

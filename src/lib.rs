pub mod config;
pub mod entitlements;
pub mod error;
pub mod extractor;
pub mod routes;

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use entitlements::EntitlementService;

async fn root() -> &'static str {
    "Entitlement Engine API"
}

/// Router with every API route and the shared service attached.
pub fn app(service: Arc<EntitlementService>) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(routes::api_routes())
        .layer(Extension(service))
}

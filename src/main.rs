use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use entitlement_engine::config;
use entitlement_engine::entitlements::{EntitlementService, PgEntitlementStore};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if the JWT secret is missing
    let _ = config::JWT_SECRET.as_str();
    let pool = PgPoolOptions::new()
        .max_connections(*config::DATABASE_MAX_CONNECTIONS)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(error.into());
        }
    }

    let entitlement_config = config::entitlement_config_from_env();
    tracing::info!(
        max_resources_allowed = entitlement_config.max_resources_allowed,
        term_months = entitlement_config.term_months,
        "entitlement configuration loaded"
    );
    let store = Arc::new(PgEntitlementStore::new(pool));
    let service = Arc::new(EntitlementService::new(store, entitlement_config));

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = entitlement_engine::app(service)
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .layer(prometheus_layer);

    let addr: SocketAddr =
        format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT).parse()?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

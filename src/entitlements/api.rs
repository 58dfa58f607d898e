use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::extractor::AuthUser;

use super::{
    plan_catalog, EntitlementService, PlanCatalogEntry, QuotaOutcome, RecordOutcome,
    Subscription, UsageSummary,
};

/// key: entitlement-api -> rest endpoints
pub fn routes() -> Router {
    Router::new()
        .route("/api/entitlements/plans", get(list_plans))
        .route("/api/entitlements/subscription", get(get_subscription))
        .route("/api/entitlements/usage", get(get_usage))
        .route(
            "/api/entitlements/payments/:reference/activate",
            post(activate_payment),
        )
        .route("/api/entitlements/chat/check", post(check_chat))
        .route("/api/entitlements/chat/record", post(record_chat))
        .route("/api/entitlements/generation/check", post(check_generation))
        .route("/api/entitlements/generation/record", post(record_generation))
        .route("/api/entitlements/resources/check", post(check_resource_save))
        .route("/api/entitlements/resources/record", post(record_resource_save))
}

pub async fn list_plans() -> Json<Vec<PlanCatalogEntry>> {
    Json(plan_catalog())
}

pub async fn get_subscription(
    Extension(service): Extension<Arc<EntitlementService>>,
    AuthUser { identity }: AuthUser,
    Query(query): Query<ScopeQuery>,
) -> AppResult<Json<Subscription>> {
    let subscription = service
        .subscription(&identity, query.scope.as_deref())
        .await?;
    Ok(Json(subscription))
}

pub async fn get_usage(
    Extension(service): Extension<Arc<EntitlementService>>,
    AuthUser { identity }: AuthUser,
    Query(query): Query<ScopeQuery>,
) -> AppResult<Json<UsageSummary>> {
    let summary = service
        .usage_summary(&identity, query.scope.as_deref())
        .await?;
    Ok(Json(summary))
}

pub async fn activate_payment(
    Extension(service): Extension<Arc<EntitlementService>>,
    AuthUser { identity }: AuthUser,
    Path(reference): Path<String>,
    Json(payload): Json<ActivatePaymentRequest>,
) -> AppResult<Json<Subscription>> {
    let subscription = service
        .activate_payment(&identity, &reference, payload.scope.as_deref())
        .await?;
    Ok(Json(subscription))
}

pub async fn check_chat(
    Extension(service): Extension<Arc<EntitlementService>>,
    AuthUser { identity }: AuthUser,
    Json(payload): Json<ItemQuotaRequest>,
) -> AppResult<Json<QuotaOutcome>> {
    let outcome = service
        .check_chat(&identity, &payload.item, payload.scope.as_deref())
        .await?;
    Ok(Json(outcome))
}

pub async fn record_chat(
    Extension(service): Extension<Arc<EntitlementService>>,
    AuthUser { identity }: AuthUser,
    Json(payload): Json<ItemQuotaRequest>,
) -> AppResult<Json<RecordOutcome>> {
    let outcome = service
        .record_chat(&identity, &payload.item, payload.scope.as_deref())
        .await?;
    Ok(Json(outcome))
}

pub async fn check_generation(
    Extension(service): Extension<Arc<EntitlementService>>,
    AuthUser { identity }: AuthUser,
    Json(payload): Json<ItemQuotaRequest>,
) -> AppResult<Json<QuotaOutcome>> {
    let outcome = service
        .check_generation(&identity, &payload.item, payload.scope.as_deref())
        .await?;
    Ok(Json(outcome))
}

pub async fn record_generation(
    Extension(service): Extension<Arc<EntitlementService>>,
    AuthUser { identity }: AuthUser,
    Json(payload): Json<ItemQuotaRequest>,
) -> AppResult<Json<RecordOutcome>> {
    let outcome = service
        .record_generation(&identity, &payload.item, payload.scope.as_deref())
        .await?;
    Ok(Json(outcome))
}

pub async fn check_resource_save(
    Extension(service): Extension<Arc<EntitlementService>>,
    AuthUser { identity }: AuthUser,
    Json(payload): Json<ResourceQuotaRequest>,
) -> AppResult<Json<QuotaOutcome>> {
    let outcome = service
        .check_resource_save(&identity, &payload.scope)
        .await?;
    Ok(Json(outcome))
}

pub async fn record_resource_save(
    Extension(service): Extension<Arc<EntitlementService>>,
    AuthUser { identity }: AuthUser,
    Json(payload): Json<ResourceQuotaRequest>,
) -> AppResult<Json<RecordOutcome>> {
    let outcome = service
        .record_resource_save(&identity, &payload.scope)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ActivatePaymentRequest {
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ItemQuotaRequest {
    pub item: String,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ResourceQuotaRequest {
    pub scope: String,
}

use std::sync::Arc;

use axum::body::Body;
use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use chrono::{Duration, TimeZone, Utc};
use entitlement_engine::entitlements::{
    EntitlementConfig, EntitlementService, FixedClock, InMemoryEntitlementStore, LearnerProfile,
    Payment, PaymentStatus,
};
use hyper::{Request, StatusCode};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

const SECRET: &str = "api-secret";

fn token(identity: &str) -> String {
    std::env::set_var("JWT_SECRET", SECRET);
    let exp = (Utc::now() + Duration::hours(1)).timestamp();
    encode(
        &Header::default(),
        &json!({"sub": identity, "exp": exp}),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn service() -> (Arc<InMemoryEntitlementStore>, Arc<EntitlementService>) {
    let store = Arc::new(InMemoryEntitlementStore::new());
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap());
    let service = EntitlementService::with_clock(
        store.clone(),
        EntitlementConfig::default(),
        Arc::new(clock),
    );
    (store, Arc::new(service))
}

fn completed(reference: &str, identity: &str, amount: i64) -> Payment {
    Payment {
        reference: reference.to_string(),
        identity: identity.to_string(),
        scope: None,
        amount,
        status: PaymentStatus::Completed,
        completed_at: Some(Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap()),
    }
}

fn post(uri: &str, identity: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token(identity)))
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_as(uri: &str, identity: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Cookie", format!("auth_token={}", token(identity)))
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn root_responds_ok() {
    let (_, service) = service();
    let response = entitlement_engine::app(service)
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(body, "Entitlement Engine API".as_bytes());
}

#[tokio::test]
async fn metrics_layer_wraps_the_app() {
    let (_, service) = service();
    let (layer, handle) = PrometheusMetricLayer::pair();
    let app = entitlement_engine::app(service)
        .route("/metrics", get(move || async move { handle.render() }))
        .layer(layer);
    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn plan_catalog_is_public() {
    let (_, service) = service();
    let response = entitlement_engine::app(service)
        .oneshot(
            Request::builder()
                .uri("/api/entitlements/plans")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let plans = json_body(response).await;
    let tiers: Vec<_> = plans
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["plan"]["tier"].as_str().unwrap().to_string())
        .collect();
    assert!(tiers.contains(&"basic".to_string()));
    assert!(tiers.contains(&"premium".to_string()));
}

#[tokio::test]
async fn quota_routes_require_a_token() {
    let (_, service) = service();
    let response = entitlement_engine::app(service)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/entitlements/chat/check")
                .header("Content-Type", "application/json")
                .body(Body::from(json!({"item": "lesson"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn activation_then_chat_metering() {
    let (store, service) = service();
    store.add_payment(completed("pay-api", "learner-1", 199));
    let app = entitlement_engine::app(service);

    let response = app
        .clone()
        .oneshot(post(
            "/api/entitlements/payments/pay-api/activate",
            "learner-1",
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let subscription = json_body(response).await;
    assert_eq!(subscription["tier"], "premium");
    assert_eq!(subscription["daily_chat_limit"], 5);

    let response = app
        .clone()
        .oneshot(post(
            "/api/entitlements/chat/record",
            "learner-1",
            json!({"item": "lesson-1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["used"], 1);

    let response = app
        .clone()
        .oneshot(post(
            "/api/entitlements/chat/check",
            "learner-1",
            json!({"item": "lesson-1"}),
        ))
        .await
        .unwrap();
    let outcome = json_body(response).await;
    assert_eq!(outcome["allowed"], true);
    assert_eq!(outcome["remaining"], 4);

    let response = app
        .oneshot(get_as("/api/entitlements/usage", "learner-1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let usage = json_body(response).await;
    assert_eq!(usage["daily_chat"][0]["item"], "lesson-1");
    assert_eq!(usage["daily_chat"][0]["count"], 1);
}

#[tokio::test]
async fn foreign_payment_is_not_found() {
    let (store, service) = service();
    store.add_payment(completed("pay-other", "learner-2", 99));
    let response = entitlement_engine::app(service)
        .oneshot(post(
            "/api/entitlements/payments/pay-other/activate",
            "intruder",
            json!({"scope": "R1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(store.subscription_count(), 0);
}

#[tokio::test]
async fn pending_payment_is_a_bad_request() {
    let (store, service) = service();
    let mut pending = completed("pay-pending", "learner-3", 99);
    pending.status = PaymentStatus::Pending;
    pending.completed_at = None;
    store.add_payment(pending);
    let response = entitlement_engine::app(service)
        .oneshot(post(
            "/api/entitlements/payments/pay-pending/activate",
            "learner-3",
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_subscription_reads_as_not_found() {
    let (_, service) = service();
    let response = entitlement_engine::app(service)
        .oneshot(get_as("/api/entitlements/subscription?scope=R1", "nobody"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn resource_save_binds_scope_and_enforces_allowance() {
    let (store, service) = service();
    store.add_payment(completed("pay-res", "learner-4", 99));
    let app = entitlement_engine::app(service);

    let response = app
        .clone()
        .oneshot(post(
            "/api/entitlements/resources/check",
            "learner-4",
            json!({"scope": "R1"}),
        ))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["allowed"], true);

    let response = app
        .clone()
        .oneshot(post(
            "/api/entitlements/resources/record",
            "learner-4",
            json!({"scope": "R1"}),
        ))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["used"], 1);

    let response = app
        .clone()
        .oneshot(post(
            "/api/entitlements/resources/check",
            "learner-4",
            json!({"scope": "R1"}),
        ))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["allowed"], false);

    let response = app
        .oneshot(get_as("/api/entitlements/subscription?scope=R1", "learner-4"))
        .await
        .unwrap();
    let subscription = json_body(response).await;
    assert_eq!(subscription["scope"], "R1");
    assert_eq!(subscription["resources_saved"], 1);
}

#[tokio::test]
async fn sponsored_learner_is_never_metered() {
    let (store, service) = service();
    store.add_learner(LearnerProfile {
        identity: "sponsored".to_string(),
        teacher_id: Some("teacher-9".to_string()),
        ..Default::default()
    });
    let response = entitlement_engine::app(service)
        .oneshot(post(
            "/api/entitlements/generation/record",
            "sponsored",
            json!({"item": "quiz"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["sponsored"], true);
    assert_eq!(store.usage_record_count(), 0);
}

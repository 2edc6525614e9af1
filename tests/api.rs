use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use opensase_promotions::api::{router, AppState};
use opensase_promotions::InMemoryStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> Router {
    router(AppState { store: Arc::new(InMemoryStore::new()), nats: None, commit_max_retries: 1 })
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, value)
}

fn window() -> (String, String) {
    let now = Utc::now();
    ((now - Duration::days(1)).to_rfc3339(), (now + Duration::days(10)).to_rfc3339())
}

async fn create_coupon(app: &Router, body: Value) -> Value {
    let (status, created) = call(app, "POST", "/api/v1/instruments", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    created
}

fn welcome20() -> Value {
    let (from, until) = window();
    json!({
        "id": "welcome20", "kind": "coupon", "code": "welcome20", "discount_type": "percentage", "value": 20,
        "min_order_amount": 5000, "max_discount_amount": 2000, "valid_from": from, "valid_until": until,
    })
}

#[tokio::test]
async fn test_health() {
    let (status, body) = call(&app(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_validate_welcome_coupon() {
    let app = app();
    let created = create_coupon(&app, welcome20()).await;
    assert_eq!(created["code"], "WELCOME20");

    let (status, body) = call(&app, "POST", "/api/v1/coupons/validate", Some(json!({"code": "Welcome20", "user_id": "u1", "subtotal": 12000}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["discount_amount"].as_f64(), Some(2000.0));
    assert_eq!(body["message"], "Coupon applied! 20% off");
}

#[tokio::test]
async fn test_validate_reports_reason() {
    let app = app();
    let (from, until) = window();
    create_coupon(&app, json!({
        "kind": "coupon", "code": "FREESHIP100", "discount_type": "free_shipping", "value": 0,
        "min_order_amount": 10000, "valid_from": from, "valid_until": until,
    })).await;

    let (_, body) = call(&app, "POST", "/api/v1/coupons/validate", Some(json!({"code": "FREESHIP100", "user_id": "u1", "subtotal": 3000}))).await;
    assert_eq!(body["valid"], false);
    assert_eq!(body["reason"]["reason"], "below_minimum_order");

    let (_, unknown) = call(&app, "POST", "/api/v1/coupons/validate", Some(json!({"code": "NOPE", "user_id": "u1", "subtotal": 3000}))).await;
    assert_eq!(unknown["valid"], false);
    assert_eq!(unknown["message"], "Invalid coupon code");
}

#[tokio::test]
async fn test_coupon_needs_its_code_to_resolve() {
    let app = app();
    create_coupon(&app, welcome20()).await;
    let cart = json!([{"product_id": "P1", "category": "women", "amount": 7000}, {"product_id": "P2", "category": "men", "amount": 5000}]);

    let (_, without) = call(&app, "POST", "/api/v1/discounts/resolve", Some(json!({"user_id": "u1", "lines": cart}))).await;
    assert_eq!(without["mode"], "none");

    let (status, with) = call(&app, "POST", "/api/v1/discounts/resolve", Some(json!({"user_id": "u1", "lines": cart, "codes": ["WELCOME20"]}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(with["mode"], "exclusive");
    assert_eq!(with["total_discount"].as_f64(), Some(2000.0));
    assert_eq!(with["applied"][0]["id"], "welcome20");
}

#[tokio::test]
async fn test_redeem_consumes_single_use() {
    let app = app();
    let (from, until) = window();
    create_coupon(&app, json!({
        "id": "once", "kind": "special_offer", "discount_type": "fixed_amount", "value": 500,
        "usage_limit": 1, "valid_from": from, "valid_until": until,
    })).await;
    let order = |id: &str| json!({"order_id": id, "user_id": "u1", "subtotal": 4000});

    let (status, first) = call(&app, "POST", "/api/v1/discounts/redeem", Some(order("o1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["redemptions"][0]["instrument_id"], "once");
    assert_eq!(first["redemptions"][0]["exhausted"], true);

    let (status, second) = call(&app, "POST", "/api/v1/discounts/redeem", Some(order("o2"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["selection"]["mode"], "none");
    assert_eq!(second["redemptions"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_rejects_invalid_requests() {
    let app = app();
    let (from, until) = window();
    let (status, _) = call(&app, "POST", "/api/v1/instruments", Some(json!({
        "kind": "coupon", "code": "TOOMUCH", "discount_type": "percentage", "value": 150,
        "valid_from": from, "valid_until": until,
    }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(&app, "POST", "/api/v1/discounts/resolve", Some(json!({"user_id": "", "subtotal": 100}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, "POST", "/api/v1/discounts/resolve", Some(json!({"user_id": "u1", "subtotal": -5}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_campaign_lifecycle_drives_event_discounts() {
    let app = app();
    let (from, until) = window();
    let (status, campaign) = call(&app, "POST", "/api/v1/campaigns", Some(json!({
        "name": "Autumn Sale", "starts_at": from, "ends_at": until, "priority": 3,
        "rules": {"categories": ["women"]},
        "discounts": [{"id": "pct", "discount_type": "percentage", "value": 10}],
    }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = campaign["id"].as_str().unwrap().to_string();
    assert_eq!(campaign["status"], "draft");

    let checkout = json!({"user_id": "u1", "lines": [{"product_id": "P1", "category": "women", "amount": 3000}]});

    let (status, paused) = call(&app, "POST", &format!("/api/v1/campaigns/{id}/pause"), None).await;
    assert_eq!(status, StatusCode::CONFLICT, "{paused}");

    let (status, active) = call(&app, "POST", &format!("/api/v1/campaigns/{id}/activate"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active["status"], "active");
    let (_, running) = call(&app, "POST", "/api/v1/discounts/resolve", Some(checkout.clone())).await;
    assert_eq!(running["total_discount"].as_f64(), Some(300.0));
    assert_eq!(running["applied"][0]["kind"], "event_discount");

    call(&app, "POST", &format!("/api/v1/campaigns/{id}/pause"), None).await;
    let (_, halted) = call(&app, "POST", "/api/v1/discounts/resolve", Some(checkout)).await;
    assert_eq!(halted["mode"], "none");

    let (status, _) = call(&app, "POST", "/api/v1/campaigns/missing/activate", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_spin_reward_is_personal() {
    let app = app();
    create_coupon(&app, welcome20()).await;
    let (status, reward) = call(&app, "POST", "/api/v1/spin-rewards", Some(json!({"user_id": "lucky", "percent": 15}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let code = reward["code"].as_str().unwrap().to_string();
    assert!(code.starts_with("SPIN"));
    assert_eq!(reward["assigned_user"], "lucky");

    let (_, available) = call(&app, "GET", "/api/v1/coupons/available", None).await;
    let codes: Vec<&str> = available.as_array().unwrap().iter().filter_map(|c| c["code"].as_str()).collect();
    assert_eq!(codes, vec!["WELCOME20"]);

    let (_, stranger) = call(&app, "POST", "/api/v1/coupons/validate", Some(json!({"code": code, "user_id": "someone", "subtotal": 5000}))).await;
    assert_eq!(stranger["valid"], false);
    assert_eq!(stranger["reason"]["reason"], "assigned_to_another_user");

    let (_, owner) = call(&app, "POST", "/api/v1/coupons/validate", Some(json!({"code": code, "user_id": "lucky", "subtotal": 5000}))).await;
    assert_eq!(owner["valid"], true);
    assert_eq!(owner["discount_amount"].as_f64(), Some(750.0));
}

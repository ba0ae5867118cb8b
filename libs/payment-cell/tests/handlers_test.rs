use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use payment_cell::router::{payment_routes, PaymentCellState};
use shared_utils::test_utils::TestConfig;

fn create_app_with_state() -> (Router, Arc<PaymentCellState>) {
    let config = TestConfig::default().to_app_config();
    let state = Arc::new(PaymentCellState::new(&config));
    (payment_routes(Arc::clone(&state)), state)
}

fn create_app() -> Router {
    create_app_with_state().0
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

async fn open_session(app: &Router, amount: i64) -> String {
    let (status, body) = send(app, "POST", "/sessions", Some(json!({ "amount": amount }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["payment"]["state"], "idle");
    body["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_card_flow_over_http() {
    let app = create_app();
    let id = open_session(&app, 50_000).await;

    let (status, body) = send(&app, "POST", &format!("/sessions/{}/start", id), Some(json!({ "method": "card" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "initializing");

    for event in [
        json!({ "type": "connected" }),
        json!({ "type": "card_detected", "entry_mode": "tap" }),
    ] {
        let (status, _) = send(&app, "POST", &format!("/sessions/{}/card-reader", id), Some(event)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&app, "GET", &format!("/sessions/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "processing");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/sessions/{}/card-reader", id),
        Some(json!({ "type": "approved", "last4": "1111", "auth_code": "XY12", "rrn": "123456789012" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "succeeded");
    assert_eq!(body["intent"]["status"], "succeeded");
    assert_eq!(body["intent"]["attempts"][0]["details"]["last4"], "1111");
}

#[tokio::test]
async fn test_rejected_events_return_conflict() {
    let app = create_app();
    let id = open_session(&app, 10_000).await;

    let (status, body) = send(&app, "POST", &format!("/sessions/{}/retry", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    send(&app, "POST", &format!("/sessions/{}/start", id), Some(json!({ "method": "cash" }))).await;
    let (status, _) = send(
        &app,
        "POST",
        &format!("/sessions/{}/card-reader", id),
        Some(json!({ "type": "card_detected", "entry_mode": "swipe" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cash_flow_closes_the_session() {
    let (app, state) = create_app_with_state();
    let id = open_session(&app, 20_000).await;

    send(&app, "POST", &format!("/sessions/{}/start", id), Some(json!({ "method": "cash" }))).await;
    let (status, body) = send(&app, "POST", &format!("/sessions/{}/cash", id), Some(json!({ "tendered": 20_000 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "succeeded");
    assert_eq!(body["intent"]["attempts"][0]["details"]["change_due"], 0);

    // The final state has been served; the session is gone.
    assert_eq!(state.registry.active_count().await, 0);
    let (status, _) = send(&app, "POST", &format!("/sessions/{}/cancel", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_finished_sessions_do_not_accumulate() {
    let (app, state) = create_app_with_state();

    for _ in 0..20 {
        let id = open_session(&app, 5_000).await;
        send(&app, "POST", &format!("/sessions/{}/start", id), Some(json!({ "method": "cash" }))).await;
        let (status, _) = send(&app, "POST", &format!("/sessions/{}/cash", id), Some(json!({ "tendered": 5_000 }))).await;
        assert_eq!(status, StatusCode::OK);
    }
    let cancelled = open_session(&app, 5_000).await;
    let (status, body) = send(&app, "POST", &format!("/sessions/{}/cancel", cancelled), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "cancelled");

    // Failed attempts stay addressable so the desk can retry.
    let open = open_session(&app, 5_000).await;
    send(&app, "POST", &format!("/sessions/{}/start", open), Some(json!({ "method": "card" }))).await;
    for event in [
        json!({ "type": "connected" }),
        json!({ "type": "card_detected", "entry_mode": "insert" }),
    ] {
        send(&app, "POST", &format!("/sessions/{}/card-reader", open), Some(event)).await;
    }
    let (status, body) = send(
        &app,
        "POST",
        &format!("/sessions/{}/card-reader", open),
        Some(json!({ "type": "declined", "code": "51", "message": "Insufficient funds" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "failed");

    assert_eq!(state.registry.active_count().await, 1);
    let (status, body) = send(&app, "POST", &format!("/sessions/{}/retry", open), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "initializing");
}

#[tokio::test]
async fn test_upi_unavailable_without_gateway() {
    let app = create_app();
    let id = open_session(&app, 20_000).await;

    let (status, _) = send(&app, "POST", &format!("/sessions/{}/start", id), Some(json!({ "method": "upi" }))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_unknown_session_and_bad_amount() {
    let app = create_app();

    let (status, _) = send(&app, "GET", &format!("/sessions/{}", uuid::Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", "/sessions", Some(json!({ "amount": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_split_preview_orders_legs() {
    let app = create_app();

    let (status, body) = send(
        &app,
        "POST",
        "/splits/preview",
        Some(json!({
            "total_due": 500,
            "rows": [
                { "method": "upi", "amount": 300 },
                { "method": "cash", "amount": 200 }
            ]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_mixed_payment"], true);
    assert_eq!(body["legs"][0]["method"], "cash");
    assert_eq!(body["legs"][1]["method"], "upi");
}

#[tokio::test]
async fn test_split_preview_rejects_unreconciled_rows() {
    let app = create_app();

    let (status, body) = send(
        &app,
        "POST",
        "/splits/preview",
        Some(json!({
            "total_due": 500,
            "rows": [{ "method": "cash", "amount": 450 }]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("450"));
}

#[tokio::test]
async fn test_split_preview_rejects_overflowing_rows() {
    let app = create_app();

    let (status, body) = send(
        &app,
        "POST",
        "/splits/preview",
        Some(json!({
            "total_due": 0,
            "rows": [
                { "method": "card", "amount": i64::MAX },
                { "method": "card", "amount": i64::MAX },
                { "method": "card", "amount": 2 }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = send(
        &app,
        "POST",
        "/splits/preview",
        Some(json!({
            "total_due": -100,
            "rows": [{ "method": "cash", "amount": -100 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

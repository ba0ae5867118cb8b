// libs/appointment-cell/tests/supabase_store_test.rs
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::{
    BookingDetails, ClaimStatus, HoldConfig, HoldError, SlotClaimStore, SlotHoldCoordinator,
    StoreError, SupabaseSlotClaimStore, TimeSlot,
};
use shared_database::supabase::SupabaseClient;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn store_for(server: &MockServer) -> SupabaseSlotClaimStore {
    let config = TestConfig::with_supabase(&server.uri()).to_app_config();
    SupabaseSlotClaimStore::new(Arc::new(SupabaseClient::new(&config)))
}

fn slot(doctor_id: Uuid) -> TimeSlot {
    TimeSlot::new(
        doctor_id,
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 20, 0).unwrap(),
    )
}

fn details() -> BookingDetails {
    BookingDetails {
        patient_id: Uuid::new_v4(),
        patient_name: "Vikram Shah".to_string(),
        appointment_type_id: None,
        notes: None,
    }
}

#[tokio::test]
async fn test_claim_goes_through_rpc() {
    let server = MockServer::start().await;
    let doctor = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let claim_id = Uuid::new_v4();
    let expires_at = Utc::now() + chrono::Duration::seconds(90);

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/claim_slot"))
        .and(header("apikey", "test-anon-key"))
        .and(body_partial_json(json!({
            "p_doctor_id": doctor,
            "p_owner_token": owner,
            "p_hold_seconds": 90,
            "p_mode": "in_person"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            MockSupabaseResponses::slot_claim_response(claim_id, doctor, owner, "held", expires_at),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let claim = store_for(&server)
        .claim(&slot(doctor), owner, Duration::from_secs(90))
        .await
        .unwrap();

    assert_eq!(claim.id, claim_id);
    assert_eq!(claim.status, ClaimStatus::Held);
    assert_eq!(claim.owner_token, owner);
    assert_eq!(claim.slot(), slot(doctor));
}

#[tokio::test]
async fn test_unique_violation_surfaces_as_slot_taken() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/claim_slot"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::unique_violation_response()),
        )
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert_matches!(
        store.claim(&slot(Uuid::new_v4()), Uuid::new_v4(), Duration::from_secs(90)).await,
        Err(StoreError::Conflict(_))
    );

    let desk = SlotHoldCoordinator::new(Arc::new(store), HoldConfig::default());
    assert_matches!(desk.hold_slot(slot(Uuid::new_v4())).await, Err(HoldError::SlotTaken));
    assert!(desk.current_hold().await.is_none());
}

#[tokio::test]
async fn test_other_store_failures_are_generic() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/claim_slot"))
        .respond_with(ResponseTemplate::new(500).set_body_string("statement timeout"))
        .mount(&server)
        .await;

    let desk = SlotHoldCoordinator::new(Arc::new(store_for(&server)), HoldConfig::default());
    let err = desk.hold_slot(slot(Uuid::new_v4())).await.unwrap_err();
    assert_matches!(err, HoldError::Store(ref msg) if msg.contains("statement timeout"));
}

#[tokio::test]
async fn test_promote_matching_no_rows_is_hold_expired() {
    let server = MockServer::start().await;
    let doctor = Uuid::new_v4();
    let claim_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/claim_slot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            MockSupabaseResponses::slot_claim_response(
                claim_id,
                doctor,
                Uuid::new_v4(),
                "held",
                Utc::now() + chrono::Duration::seconds(90),
            ),
        ))
        .mount(&server)
        .await;

    // Swept by the store before the desk confirmed.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/slot_claims"))
        .and(query_param("id", format!("eq.{}", claim_id)))
        .and(query_param("status", "eq.held"))
        .and(header("Prefer", "return=representation"))
        .and(body_partial_json(json!({ "status": "booked" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let desk = SlotHoldCoordinator::new(Arc::new(store_for(&server)), HoldConfig::default());
    let handle = desk.hold_slot(slot(doctor)).await.unwrap();

    assert_matches!(
        desk.confirm_booking(&handle, details()).await,
        Err(HoldError::HoldExpired)
    );
    assert!(desk.current_hold().await.is_none());
}

#[tokio::test]
async fn test_promote_returns_booked_row() {
    let server = MockServer::start().await;
    let doctor = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let claim_id = Uuid::new_v4();
    let details = details();

    let mut booked = MockSupabaseResponses::slot_claim_response(
        claim_id,
        doctor,
        owner,
        "booked",
        Utc::now() + chrono::Duration::seconds(60),
    );
    booked["patient_id"] = json!(details.patient_id);
    booked["patient_name"] = json!(details.patient_name);

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/slot_claims"))
        .and(query_param("id", format!("eq.{}", claim_id)))
        .and(query_param("status", "eq.held"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([booked])))
        .mount(&server)
        .await;

    let row = store_for(&server)
        .promote(claim_id, &details)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(row.status, ClaimStatus::Booked);
    assert_eq!(row.patient_id, Some(details.patient_id));
    assert_eq!(row.patient_name.as_deref(), Some("Vikram Shah"));
}

#[tokio::test]
async fn test_cancel_reports_whether_a_row_was_held() {
    let server = MockServer::start().await;
    let held = Uuid::new_v4();
    let gone = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/slot_claims"))
        .and(query_param("id", format!("eq.{}", held)))
        .and(body_partial_json(json!({ "status": "cancelled" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_claim_response(
                held,
                Uuid::new_v4(),
                Uuid::new_v4(),
                "cancelled",
                Utc::now(),
            )
        ])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/slot_claims"))
        .and(query_param("id", format!("eq.{}", gone)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert!(store.cancel(held).await.unwrap());
    assert!(!store.cancel(gone).await.unwrap());
}

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::{AppConfig, SlotStoreBackend};

pub struct TestConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub upi_gateway_url: String,
    pub hold_duration_seconds: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            upi_gateway_url: String::new(),
            hold_duration_seconds: 90,
        }
    }
}

impl TestConfig {
    /// Point the Supabase client at a mock server.
    pub fn with_supabase(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn with_upi_gateway(mut self, url: &str) -> Self {
        self.upi_gateway_url = url.to_string();
        self
    }

    pub fn with_hold_seconds(mut self, seconds: u64) -> Self {
        self.hold_duration_seconds = seconds;
        self
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            slot_store_backend: SlotStoreBackend::Supabase,
            hold_duration_seconds: self.hold_duration_seconds,
            upi_gateway_url: self.upi_gateway_url.clone(),
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    /// One `slot_claims` row as PostgREST returns it.
    pub fn slot_claim_response(
        claim_id: Uuid,
        doctor_id: Uuid,
        owner_token: Uuid,
        status: &str,
        expires_at: DateTime<Utc>,
    ) -> Value {
        json!({
            "id": claim_id,
            "doctor_id": doctor_id,
            "start_time": "2026-03-02T09:00:00Z",
            "end_time": "2026-03-02T09:20:00Z",
            "mode": "in_person",
            "location_id": null,
            "status": status,
            "owner_token": owner_token,
            "expires_at": expires_at.to_rfc3339(),
            "patient_id": null,
            "patient_name": null,
            "appointment_type_id": null,
            "notes": null,
            "created_at": (expires_at - Duration::seconds(90)).to_rfc3339()
        })
    }

    pub fn unique_violation_response() -> Value {
        json!({
            "code": "23505",
            "details": "Key (doctor_id, start_time, end_time) already exists.",
            "hint": null,
            "message": "duplicate key value violates unique constraint \"slot_claims_active_slot_key\""
        })
    }

    pub fn upi_qr_response(reference: &str, expires_at: DateTime<Utc>) -> Value {
        json!({
            "reference": reference,
            "qr_payload": format!("upi://pay?pa=frontdesk@clinicbank&tr={}", reference),
            "deep_link": format!("upi://pay?pa=frontdesk@clinicbank&tr={}&mode=04", reference),
            "expires_at": expires_at.to_rfc3339()
        })
    }
}

// libs/appointment-cell/src/services/store.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::Method;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::{SupabaseClient, SupabaseError};

use crate::models::{BookingDetails, SlotClaim, StoreError, TimeSlot};

/// Backing store for slot claims. Implementations must make `claim` atomic
/// with respect to the slot identity and guard `cancel`/`promote` on the
/// row still being held.
#[async_trait]
pub trait SlotClaimStore: Send + Sync {
    /// Insert a held row; `StoreError::Conflict` if a live claim exists.
    async fn claim(
        &self,
        slot: &TimeSlot,
        owner: Uuid,
        hold_duration: Duration,
    ) -> Result<SlotClaim, StoreError>;

    /// `held -> cancelled`. `false` when the row was no longer held.
    async fn cancel(&self, hold_id: Uuid) -> Result<bool, StoreError>;

    /// `held -> booked` while unexpired. `None` when zero rows matched.
    async fn promote(
        &self,
        hold_id: Uuid,
        details: &BookingDetails,
    ) -> Result<Option<SlotClaim>, StoreError>;

    async fn find(&self, hold_id: Uuid) -> Result<Option<SlotClaim>, StoreError>;
}

impl From<SupabaseError> for StoreError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::Conflict(msg) => StoreError::Conflict(msg),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// `slot_claims` over PostgREST. The claim itself goes through the
/// `claim_slot` function, which sweeps lapsed holds for the key and inserts
/// under the partial unique index in one transaction.
pub struct SupabaseSlotClaimStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseSlotClaimStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn held_row_filter(hold_id: Uuid) -> String {
        format!("/rest/v1/slot_claims?id=eq.{}&status=eq.held", hold_id)
    }
}

#[async_trait]
impl SlotClaimStore for SupabaseSlotClaimStore {
    async fn claim(
        &self,
        slot: &TimeSlot,
        owner: Uuid,
        hold_duration: Duration,
    ) -> Result<SlotClaim, StoreError> {
        debug!("Claiming slot {} for owner {}", slot.identity(), owner);

        let body = json!({
            "p_doctor_id": slot.doctor_id,
            "p_start_time": slot.start.to_rfc3339(),
            "p_end_time": slot.end.to_rfc3339(),
            "p_mode": slot.mode,
            "p_location_id": slot.location_id,
            "p_owner_token": owner,
            "p_hold_seconds": hold_duration.as_secs(),
        });

        let claim: SlotClaim = self
            .supabase
            .request(Method::POST, "/rest/v1/rpc/claim_slot", None, Some(body))
            .await?;
        Ok(claim)
    }

    async fn cancel(&self, hold_id: Uuid) -> Result<bool, StoreError> {
        let rows: Vec<SlotClaim> = self
            .supabase
            .request_returning(
                Method::PATCH,
                &Self::held_row_filter(hold_id),
                None,
                Some(json!({ "status": "cancelled" })),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn promote(
        &self,
        hold_id: Uuid,
        details: &BookingDetails,
    ) -> Result<Option<SlotClaim>, StoreError> {
        // `Z` suffix keeps the timestamp free of `+`, which PostgREST would read as a space.
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let path = format!("{}&expires_at=gt.{}", Self::held_row_filter(hold_id), now);

        let body = json!({
            "status": "booked",
            "patient_id": details.patient_id,
            "patient_name": details.patient_name,
            "appointment_type_id": details.appointment_type_id,
            "notes": details.notes,
        });

        let rows: Vec<SlotClaim> = self
            .supabase
            .request_returning(Method::PATCH, &path, None, Some(body))
            .await?;

        if rows.len() > 1 {
            warn!("Promotion of hold {} touched {} rows", hold_id, rows.len());
        }
        Ok(rows.into_iter().next())
    }

    async fn find(&self, hold_id: Uuid) -> Result<Option<SlotClaim>, StoreError> {
        let path = format!("/rest/v1/slot_claims?id=eq.{}&select=*", hold_id);
        let rows: Vec<SlotClaim> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await?;
        Ok(rows.into_iter().next())
    }
}

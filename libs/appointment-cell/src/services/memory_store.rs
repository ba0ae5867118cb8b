// libs/appointment-cell/src/services/memory_store.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::{BookingDetails, ClaimStatus, SlotClaim, StoreError, TimeSlot};
use crate::services::store::SlotClaimStore;

/// Process-local slot claims. Check-and-insert happens under one write lock,
/// which gives the same all-or-nothing claim the database index does.
#[derive(Default, Clone)]
pub struct InMemorySlotClaimStore {
    claims: Arc<RwLock<HashMap<Uuid, SlotClaim>>>,
}

impl InMemorySlotClaimStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotClaimStore for InMemorySlotClaimStore {
    async fn claim(
        &self,
        slot: &TimeSlot,
        owner: Uuid,
        hold_duration: Duration,
    ) -> Result<SlotClaim, StoreError> {
        let ttl = chrono::Duration::from_std(hold_duration)
            .map_err(|e| StoreError::Backend(format!("hold duration out of range: {}", e)))?;
        let identity = slot.identity();
        let now = Utc::now();

        let mut claims = self.claims.write().await;

        if let Some(existing) = claims
            .values()
            .find(|c| c.identity() == identity && c.blocks_slot_at(now))
        {
            return Err(StoreError::Conflict(format!(
                "slot {} is {} by claim {}",
                identity, existing.status, existing.id
            )));
        }

        // Sweep lapsed holds for this key so they can never be promoted later.
        for lapsed in claims
            .values_mut()
            .filter(|c| c.identity() == identity && c.status == ClaimStatus::Held)
        {
            debug!("Sweeping lapsed hold {}", lapsed.id);
            lapsed.status = ClaimStatus::Cancelled;
        }

        let claim = SlotClaim {
            id: Uuid::new_v4(),
            doctor_id: slot.doctor_id,
            start_time: slot.start,
            end_time: slot.end,
            mode: slot.mode,
            location_id: slot.location_id,
            status: ClaimStatus::Held,
            owner_token: owner,
            expires_at: now + ttl,
            patient_id: None,
            patient_name: None,
            appointment_type_id: None,
            notes: None,
            created_at: Some(now),
        };
        claims.insert(claim.id, claim.clone());
        Ok(claim)
    }

    async fn cancel(&self, hold_id: Uuid) -> Result<bool, StoreError> {
        let mut claims = self.claims.write().await;
        match claims.get_mut(&hold_id) {
            Some(claim) if claim.status == ClaimStatus::Held => {
                claim.status = ClaimStatus::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn promote(
        &self,
        hold_id: Uuid,
        details: &BookingDetails,
    ) -> Result<Option<SlotClaim>, StoreError> {
        let now = Utc::now();
        let mut claims = self.claims.write().await;
        match claims.get_mut(&hold_id) {
            Some(claim) if claim.status == ClaimStatus::Held && claim.expires_at > now => {
                claim.status = ClaimStatus::Booked;
                claim.patient_id = Some(details.patient_id);
                claim.patient_name = Some(details.patient_name.clone());
                claim.appointment_type_id = details.appointment_type_id;
                claim.notes = details.notes.clone();
                Ok(Some(claim.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find(&self, hold_id: Uuid) -> Result<Option<SlotClaim>, StoreError> {
        Ok(self.claims.read().await.get(&hold_id).cloned())
    }
}

// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use uuid::Uuid;

use payment_cell::AllocationError;
use shared_config::AppConfig;
use shared_models::error::AppError;

// ==============================================================================
// SLOTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationMode {
    #[default]
    InPerson,
    Telehealth,
}

impl fmt::Display for ConsultationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsultationMode::InPerson => write!(f, "in_person"),
            ConsultationMode::Telehealth => write!(f, "telehealth"),
        }
    }
}

/// The key the store's uniqueness constraint is defined on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SlotIdentity {
    pub doctor_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl fmt::Display for SlotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}..{}", self.doctor_id, self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Immutable bookable range. Equality and hashing follow the slot identity
/// only; mode and location ride along.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub doctor_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub mode: ConsultationMode,
    pub location_id: Option<Uuid>,
}

impl TimeSlot {
    pub fn new(doctor_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            doctor_id,
            start,
            end,
            mode: ConsultationMode::InPerson,
            location_id: None,
        }
    }

    pub fn identity(&self) -> SlotIdentity {
        SlotIdentity {
            doctor_id: self.doctor_id,
            start: self.start,
            end: self.end,
        }
    }
}

impl PartialEq for TimeSlot {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for TimeSlot {}

impl Hash for TimeSlot {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

// ==============================================================================
// SLOT CLAIM ROWS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Held,
    Booked,
    Cancelled,
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimStatus::Held => write!(f, "held"),
            ClaimStatus::Booked => write!(f, "booked"),
            ClaimStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A row in `slot_claims`. Held rows become bookings in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotClaim {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub mode: ConsultationMode,
    pub location_id: Option<Uuid>,
    pub status: ClaimStatus,
    pub owner_token: Uuid,
    pub expires_at: DateTime<Utc>,
    pub patient_id: Option<Uuid>,
    pub patient_name: Option<String>,
    pub appointment_type_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl SlotClaim {
    pub fn slot(&self) -> TimeSlot {
        TimeSlot {
            doctor_id: self.doctor_id,
            start: self.start_time,
            end: self.end_time,
            mode: self.mode,
            location_id: self.location_id,
        }
    }

    pub fn identity(&self) -> SlotIdentity {
        SlotIdentity {
            doctor_id: self.doctor_id,
            start: self.start_time,
            end: self.end_time,
        }
    }

    /// Booked rows always block the slot; held rows only until they lapse.
    pub fn blocks_slot_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ClaimStatus::Booked => true,
            ClaimStatus::Held => self.expires_at > now,
            ClaimStatus::Cancelled => false,
        }
    }
}

// ==============================================================================
// HOLDS AND BOOKINGS
// ==============================================================================

/// Proof of ownership for a hold, minted by `SlotHoldCoordinator::hold_slot`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HoldHandle {
    pub hold_id: Uuid,
    pub slot: TimeSlot,
    pub expires_at: DateTime<Utc>,
    pub owner: Uuid,
}

impl HoldHandle {
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDetails {
    pub patient_id: Uuid,
    pub patient_name: String,
    pub appointment_type_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: Uuid,
    pub slot: TimeSlot,
    pub patient_id: Option<Uuid>,
    pub patient_name: Option<String>,
    pub appointment_type_id: Option<Uuid>,
    pub notes: Option<String>,
}

impl From<SlotClaim> for Booking {
    fn from(row: SlotClaim) -> Self {
        Self {
            booking_id: row.id,
            slot: row.slot(),
            patient_id: row.patient_id,
            patient_name: row.patient_name,
            appointment_type_id: row.appointment_type_id,
            notes: row.notes,
        }
    }
}

/// UI-facing view of the owned hold, refreshed once per tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HoldCountdown {
    Idle,
    Held { hold_id: Uuid, remaining_secs: u64 },
    Expired { hold_id: Uuid },
    Booked { booking_id: Uuid },
    Released { hold_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldConfig {
    pub hold_duration: Duration,
    pub countdown_tick: Duration,
}

impl HoldConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            hold_duration: config.hold_duration(),
            countdown_tick: Duration::from_secs(1),
        }
    }

    pub fn with_hold_duration(mut self, hold_duration: Duration) -> Self {
        self.hold_duration = hold_duration;
        self
    }
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HoldError {
    #[error("SLOT_TAKEN: slot no longer available, pick another time")]
    SlotTaken,

    #[error("HOLD_EXPIRED: hold expired, restart slot selection")]
    HoldExpired,

    #[error("Hold belongs to another desk session")]
    NotOwner,

    #[error("Slot store error: {0}")]
    Store(String),
}

impl HoldError {
    pub fn code(&self) -> &'static str {
        match self {
            HoldError::SlotTaken => "SLOT_TAKEN",
            HoldError::HoldExpired => "HOLD_EXPIRED",
            HoldError::NotOwner => "NOT_OWNER",
            HoldError::Store(_) => "STORE_ERROR",
        }
    }
}

/// Failures reported by a `SlotClaimStore` adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Conflicting claim: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Hold(#[from] HoldError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("{} payment leg(s) not settled yet", outstanding.len())]
    PaymentsOutstanding { outstanding: Vec<Uuid> },

    #[error("No checkout in progress for hold {0}")]
    NotStarted(Uuid),
}

impl From<HoldError> for AppError {
    fn from(err: HoldError) -> Self {
        match err {
            HoldError::SlotTaken => {
                AppError::Conflict("Slot no longer available, pick another time".to_string())
            }
            HoldError::HoldExpired => {
                AppError::Gone("Hold expired, restart slot selection".to_string())
            }
            HoldError::NotOwner => AppError::Forbidden(err.to_string()),
            HoldError::Store(msg) => AppError::Database(msg),
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::Hold(e) => e.into(),
            CheckoutError::Allocation(e) => e.into(),
            CheckoutError::PaymentsOutstanding { .. } => AppError::Conflict(err.to_string()),
            CheckoutError::NotStarted(_) => AppError::NotFound(err.to_string()),
        }
    }
}

// libs/payment-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Amounts always travel as integer minor-currency units (paise, cents).
pub type MinorUnits = i64;

// ==============================================================================
// PAYMENT METHODS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Upi,
}

impl PaymentMethod {
    /// Card and UPI legs need a device or gateway round-trip.
    pub fn is_device_mediated(&self) -> bool {
        matches!(self, PaymentMethod::Card | PaymentMethod::Upi)
    }

    pub fn default_provider(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "front_desk_cash",
            PaymentMethod::Card => "pos_terminal",
            PaymentMethod::Upi => "upi_gateway",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Cash => write!(f, "cash"),
            PaymentMethod::Card => write!(f, "card"),
            PaymentMethod::Upi => write!(f, "upi"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPurpose {
    Settlement,
    Advance,
    Dues,
    Refund,
}

// ==============================================================================
// INTENT / ATTEMPT LIFECYCLE
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresAction,
    Processing,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Initiated,
    AwaitingInput,
    Processing,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptStatus::Succeeded | AttemptStatus::Failed | AttemptStatus::TimedOut | AttemptStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CardEntryMode {
    Tap,
    Insert,
    Swipe,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardDetails {
    pub entry_mode: Option<CardEntryMode>,
    pub last4: Option<String>,
    pub auth_code: Option<String>,
    pub rrn: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpiDetails {
    pub payer_handle: Option<String>,
    pub utr: Option<String>,
    pub rrn: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CashDetails {
    pub tendered: MinorUnits,
    pub change_due: MinorUnits,
}

/// Method-specific metadata recorded on an attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AttemptDetails {
    Cash(CashDetails),
    Card(CardDetails),
    Upi(UpiDetails),
}

impl AttemptDetails {
    pub fn empty_for(method: PaymentMethod) -> Option<Self> {
        match method {
            PaymentMethod::Cash => None,
            PaymentMethod::Card => Some(AttemptDetails::Card(CardDetails::default())),
            PaymentMethod::Upi => Some(AttemptDetails::Upi(UpiDetails::default())),
        }
    }
}

/// Confirmation data carried by a successful device or gateway callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentReceipt {
    Card {
        last4: Option<String>,
        auth_code: Option<String>,
        rrn: Option<String>,
    },
    Upi {
        payer_handle: Option<String>,
        utr: Option<String>,
        rrn: Option<String>,
    },
}

// ==============================================================================
// FAILURE TAXONOMY
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FailureCode {
    NetworkError,
    CardRemoved,
    PosDisconnected,
    BankDeclined,
    InsufficientFunds,
    InvalidCard,
    ExpiredCard,
    PayerCancelled,
    UpiTimeout,
    GatewayError,
    QrExpired,
    Other(String),
}

impl FailureCode {
    pub fn as_str(&self) -> &str {
        match self {
            FailureCode::NetworkError => "network_error",
            FailureCode::CardRemoved => "card_removed",
            FailureCode::PosDisconnected => "pos_disconnected",
            FailureCode::BankDeclined => "bank_declined",
            FailureCode::InsufficientFunds => "insufficient_funds",
            FailureCode::InvalidCard => "invalid_card",
            FailureCode::ExpiredCard => "expired_card",
            FailureCode::PayerCancelled => "payer_cancelled",
            FailureCode::UpiTimeout => "upi_timeout",
            FailureCode::GatewayError => "gateway_error",
            FailureCode::QrExpired => "qr_expired",
            FailureCode::Other(raw) => raw,
        }
    }

    /// Fixed front-desk wording for known codes; `None` for unknown ones.
    pub fn user_message(&self) -> Option<&'static str> {
        let message = match self {
            FailureCode::NetworkError => "Network error. Check the connection and try again.",
            FailureCode::CardRemoved => "Card was removed too early. Please insert the card again.",
            FailureCode::PosDisconnected => "Card reader disconnected. Reconnect the device to continue.",
            FailureCode::BankDeclined => "Payment declined by the bank. Try another card or method.",
            FailureCode::InsufficientFunds => "Insufficient funds. Try another card or method.",
            FailureCode::InvalidCard => "Card could not be read. Try another card.",
            FailureCode::ExpiredCard => "Card has expired. Try another card.",
            FailureCode::PayerCancelled => "Payment was cancelled by the payer.",
            FailureCode::UpiTimeout => "UPI payment was not completed in time.",
            FailureCode::GatewayError => "Payment gateway error. Please try again.",
            FailureCode::QrExpired => "QR code expired. Generate a new one to continue.",
            FailureCode::Other(_) => return None,
        };
        Some(message)
    }
}

impl From<String> for FailureCode {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "network_error" => FailureCode::NetworkError,
            "card_removed" => FailureCode::CardRemoved,
            "pos_disconnected" => FailureCode::PosDisconnected,
            "bank_declined" => FailureCode::BankDeclined,
            "insufficient_funds" => FailureCode::InsufficientFunds,
            "invalid_card" => FailureCode::InvalidCard,
            "expired_card" => FailureCode::ExpiredCard,
            "payer_cancelled" => FailureCode::PayerCancelled,
            "upi_timeout" => FailureCode::UpiTimeout,
            "gateway_error" => FailureCode::GatewayError,
            "qr_expired" => FailureCode::QrExpired,
            _ => FailureCode::Other(raw),
        }
    }
}

impl From<&str> for FailureCode {
    fn from(raw: &str) -> Self {
        FailureCode::from(raw.to_string())
    }
}

impl From<FailureCode> for String {
    fn from(code: FailureCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentFailure {
    pub code: FailureCode,
    pub message: String,
}

impl PaymentFailure {
    /// Known codes get the fixed message, unknown codes keep the raw one.
    pub fn new(code: FailureCode, raw_message: impl Into<String>) -> Self {
        let message = match code.user_message() {
            Some(fixed) => fixed.to_string(),
            None => raw_message.into(),
        };
        Self { code, message }
    }
}

// ==============================================================================
// INTENT / ATTEMPT RECORDS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub method: PaymentMethod,
    pub provider: String,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub details: Option<AttemptDetails>,
    pub failure: Option<PaymentFailure>,
}

impl PaymentAttempt {
    pub fn new(method: PaymentMethod, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            provider: method.default_provider().to_string(),
            status: AttemptStatus::Initiated,
            started_at: now,
            completed_at: None,
            details: AttemptDetails::empty_for(method),
            failure: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub amount: MinorUnits,
    pub purpose: PaymentPurpose,
    pub status: IntentStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub attempts: Vec<PaymentAttempt>,
}

impl PaymentIntent {
    pub fn new(amount: MinorUnits, purpose: PaymentPurpose) -> Self {
        Self {
            id: Uuid::new_v4(),
            amount,
            purpose,
            status: IntentStatus::RequiresAction,
            expires_at: None,
            attempts: Vec::new(),
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn current_attempt(&self) -> Option<&PaymentAttempt> {
        self.attempts.last()
    }

    pub fn current_attempt_mut(&mut self) -> Option<&mut PaymentAttempt> {
        self.attempts.last_mut()
    }

    pub fn has_succeeded_attempt(&self) -> bool {
        self.attempts.iter().any(|a| a.status == AttemptStatus::Succeeded)
    }

    pub fn open_attempts(&self) -> usize {
        self.attempts.iter().filter(|a| !a.status.is_terminal()).count()
    }
}

/// UPI collect request rendered as a scannable QR.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpiQr {
    pub reference: String,
    pub qr_payload: String,
    pub deep_link: String,
    pub expires_at: DateTime<Utc>,
}

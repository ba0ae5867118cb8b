// libs/payment-cell/src/services/card.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{CardEntryMode, FailureCode, PaymentReceipt};
use crate::services::state_machine::PaymentEvent;

/// Callback shape posted by the card terminal bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CardReaderEvent {
    Connected,
    Disconnected,
    CardDetected {
        entry_mode: CardEntryMode,
    },
    Processing {
        #[serde(default)]
        message: Option<String>,
    },
    Approved {
        last4: Option<String>,
        auth_code: Option<String>,
        rrn: Option<String>,
    },
    Declined {
        code: String,
        #[serde(default)]
        message: String,
    },
    Error {
        code: String,
        #[serde(default)]
        message: String,
    },
    Timeout,
}

impl CardReaderEvent {
    /// Translate a reader callback into a machine event. `Timeout` needs the
    /// attempt it belongs to, so the caller supplies the current one.
    pub fn into_payment_event(self, current_attempt: Option<Uuid>) -> Option<PaymentEvent> {
        let event = match self {
            CardReaderEvent::Connected => PaymentEvent::SdkReady,
            CardReaderEvent::Disconnected => PaymentEvent::DeviceDisconnected,
            CardReaderEvent::CardDetected { entry_mode } => PaymentEvent::CardDetected { entry_mode },
            CardReaderEvent::Processing { message } => PaymentEvent::ProcessingStarted { message },
            CardReaderEvent::Approved { last4, auth_code, rrn } => PaymentEvent::PaymentSuccess {
                receipt: PaymentReceipt::Card { last4, auth_code, rrn },
            },
            CardReaderEvent::Declined { code, message } => PaymentEvent::PaymentFailed {
                code: FailureCode::from(code),
                message,
            },
            CardReaderEvent::Error { code, message } => {
                let code = match FailureCode::from(code) {
                    FailureCode::Other(raw) if raw.is_empty() => FailureCode::NetworkError,
                    known => known,
                };
                PaymentEvent::PaymentFailed { code, message }
            }
            CardReaderEvent::Timeout => PaymentEvent::Timeout { attempt_id: current_attempt? },
        };
        Some(event)
    }
}

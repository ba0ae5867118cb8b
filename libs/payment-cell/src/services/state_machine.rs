// libs/payment-cell/src/services/state_machine.rs
//
// Finite-state machine for one payment intent. `transition` is the pure
// state table; `PaymentStateMachine::dispatch` applies it to the intent and
// its attempts and hands timer work back to the caller as `Effect`s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TransitionError;
use crate::models::{
    AttemptDetails, AttemptStatus, CardDetails, CardEntryMode, CashDetails, FailureCode,
    IntentStatus, MinorUnits, PaymentAttempt, PaymentFailure, PaymentIntent, PaymentMethod,
    PaymentReceipt, UpiDetails, UpiQr,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Idle,
    Initializing,
    AwaitingInput,
    Processing,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl PaymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentState::Succeeded | PaymentState::Failed | PaymentState::TimedOut | PaymentState::Cancelled
        )
    }

    /// Terminal with no retry left; nothing can move the session on.
    pub fn is_closed(&self) -> bool {
        matches!(self, PaymentState::Succeeded | PaymentState::Cancelled)
    }

    fn attempt_status(&self) -> Option<AttemptStatus> {
        match self {
            PaymentState::Idle => None,
            PaymentState::Initializing => Some(AttemptStatus::Initiated),
            PaymentState::AwaitingInput => Some(AttemptStatus::AwaitingInput),
            PaymentState::Processing => Some(AttemptStatus::Processing),
            PaymentState::Succeeded => Some(AttemptStatus::Succeeded),
            PaymentState::Failed => Some(AttemptStatus::Failed),
            PaymentState::TimedOut => Some(AttemptStatus::TimedOut),
            PaymentState::Cancelled => Some(AttemptStatus::Cancelled),
        }
    }

    fn intent_status(&self) -> IntentStatus {
        match self {
            PaymentState::Idle | PaymentState::Initializing | PaymentState::AwaitingInput => {
                IntentStatus::RequiresAction
            }
            PaymentState::Processing => IntentStatus::Processing,
            PaymentState::Succeeded => IntentStatus::Succeeded,
            PaymentState::Failed => IntentStatus::Failed,
            PaymentState::TimedOut => IntentStatus::TimedOut,
            PaymentState::Cancelled => IntentStatus::Cancelled,
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentState::Idle => "idle",
            PaymentState::Initializing => "initializing",
            PaymentState::AwaitingInput => "awaiting_input",
            PaymentState::Processing => "processing",
            PaymentState::Succeeded => "succeeded",
            PaymentState::Failed => "failed",
            PaymentState::TimedOut => "timed_out",
            PaymentState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    Start { method: PaymentMethod },
    SdkReady,
    QrGenerated { qr: UpiQr },
    CardDetected { entry_mode: CardEntryMode },
    UpiScanStarted { payer_handle: Option<String> },
    ProcessingStarted { message: Option<String> },
    PaymentSuccess { receipt: PaymentReceipt },
    PaymentFailed { code: FailureCode, message: String },
    CashReceived { tendered: MinorUnits },
    Timeout { attempt_id: Uuid },
    Cancel,
    Retry,
    DeviceDisconnected,
    DeviceReconnected,
}

impl PaymentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PaymentEvent::Start { .. } => "START",
            PaymentEvent::SdkReady => "SDK_READY",
            PaymentEvent::QrGenerated { .. } => "QR_GENERATED",
            PaymentEvent::CardDetected { .. } => "CARD_DETECTED",
            PaymentEvent::UpiScanStarted { .. } => "UPI_SCAN_STARTED",
            PaymentEvent::ProcessingStarted { .. } => "PROCESSING_STARTED",
            PaymentEvent::PaymentSuccess { .. } => "PAYMENT_SUCCESS",
            PaymentEvent::PaymentFailed { .. } => "PAYMENT_FAILED",
            PaymentEvent::CashReceived { .. } => "CASH_RECEIVED",
            PaymentEvent::Timeout { .. } => "TIMEOUT",
            PaymentEvent::Cancel => "CANCEL",
            PaymentEvent::Retry => "RETRY",
            PaymentEvent::DeviceDisconnected => "DEVICE_DISCONNECTED",
            PaymentEvent::DeviceReconnected => "DEVICE_RECONNECTED",
        }
    }

    /// Method an event is restricted to, if any.
    fn required_method(&self) -> Option<PaymentMethod> {
        match self {
            PaymentEvent::SdkReady
            | PaymentEvent::CardDetected { .. }
            | PaymentEvent::DeviceDisconnected
            | PaymentEvent::DeviceReconnected => Some(PaymentMethod::Card),
            PaymentEvent::QrGenerated { .. } | PaymentEvent::UpiScanStarted { .. } => Some(PaymentMethod::Upi),
            PaymentEvent::CashReceived { .. } => Some(PaymentMethod::Cash),
            _ => None,
        }
    }
}

/// Timer work the driving code must perform after a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ScheduleTimeout { attempt_id: Uuid, after: Duration },
    ClearTimeout,
}

/// What the pure table needs to know besides the state itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionContext<'a> {
    pub method: Option<PaymentMethod>,
    pub failure_code: Option<&'a FailureCode>,
    pub current_attempt: Option<Uuid>,
}

/// The state table. Pure: no clocks, no I/O, no mutation.
pub fn transition(
    state: PaymentState,
    ctx: TransitionContext<'_>,
    event: &PaymentEvent,
) -> Result<PaymentState, TransitionError> {
    use PaymentState::*;

    let rejected = || TransitionError::Rejected { state, event: event.name() };

    if let Some(required) = event.required_method() {
        if let Some(method) = ctx.method {
            if method != required {
                return Err(TransitionError::MethodMismatch { method, event: event.name() });
            }
        }
    }

    match (state, event) {
        (Idle, PaymentEvent::Start { .. }) => Ok(Initializing),

        (Initializing, PaymentEvent::SdkReady) => Ok(AwaitingInput),
        (Initializing, PaymentEvent::QrGenerated { .. }) => Ok(AwaitingInput),
        (Initializing, PaymentEvent::CashReceived { .. }) => Ok(Succeeded),

        (AwaitingInput, PaymentEvent::CardDetected { .. }) => Ok(Processing),
        (AwaitingInput, PaymentEvent::UpiScanStarted { .. }) => Ok(Processing),

        (Processing, PaymentEvent::ProcessingStarted { .. }) => Ok(Processing),
        (Processing, PaymentEvent::PaymentSuccess { .. }) => Ok(Succeeded),
        (Processing, PaymentEvent::PaymentFailed { .. }) => Ok(Failed),

        (s, PaymentEvent::Timeout { attempt_id }) if !s.is_terminal() => {
            if ctx.current_attempt != Some(*attempt_id) {
                return Err(TransitionError::StaleTimeout { attempt_id: *attempt_id });
            }
            Ok(TimedOut)
        }
        (s, PaymentEvent::Cancel) if !s.is_terminal() => Ok(Cancelled),

        (Failed | TimedOut, PaymentEvent::Retry) => Ok(Initializing),

        (Initializing | AwaitingInput | Processing, PaymentEvent::DeviceDisconnected)
            if ctx.method == Some(PaymentMethod::Card) => Ok(Failed),
        (Failed, PaymentEvent::DeviceReconnected)
            if ctx.failure_code == Some(&FailureCode::PosDisconnected) => Ok(AwaitingInput),

        _ => Err(rejected()),
    }
}

/// Serialisable view handed to UI and API callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSnapshot {
    pub state: PaymentState,
    pub status_text: String,
    pub method: Option<PaymentMethod>,
    pub intent: PaymentIntent,
    pub error: Option<PaymentFailure>,
    pub qr: Option<UpiQr>,
}

pub struct PaymentStateMachine {
    state: PaymentState,
    method: Option<PaymentMethod>,
    intent: PaymentIntent,
    status_text: String,
    error: Option<PaymentFailure>,
    qr: Option<UpiQr>,
}

impl PaymentStateMachine {
    pub fn new(intent: PaymentIntent) -> Self {
        Self {
            state: PaymentState::Idle,
            method: None,
            intent,
            status_text: "Select a payment method".to_string(),
            error: None,
            qr: None,
        }
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn method(&self) -> Option<PaymentMethod> {
        self.method
    }

    pub fn intent(&self) -> &PaymentIntent {
        &self.intent
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn error(&self) -> Option<&PaymentFailure> {
        self.error.as_ref()
    }

    pub fn qr(&self) -> Option<&UpiQr> {
        self.qr.as_ref()
    }

    pub fn current_attempt_id(&self) -> Option<Uuid> {
        self.intent.current_attempt().map(|a| a.id)
    }

    pub fn snapshot(&self) -> PaymentSnapshot {
        PaymentSnapshot {
            state: self.state,
            status_text: self.status_text.clone(),
            method: self.method,
            intent: self.intent.clone(),
            error: self.error.clone(),
            qr: self.qr.clone(),
        }
    }

    /// Arm a deadline for the current attempt. The caller owns the timer and
    /// must dispatch `Timeout { attempt_id }` when it fires.
    pub fn start_timeout(&self, after: Duration) -> Option<Effect> {
        if self.state.is_terminal() {
            return None;
        }
        self.current_attempt_id()
            .map(|attempt_id| Effect::ScheduleTimeout { attempt_id, after })
    }

    pub fn dispatch(&mut self, event: PaymentEvent) -> Result<Vec<Effect>, TransitionError> {
        self.dispatch_at(event, Utc::now())
    }

    pub fn dispatch_at(
        &mut self,
        event: PaymentEvent,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>, TransitionError> {
        let ctx = TransitionContext {
            method: self.method,
            failure_code: self.error.as_ref().map(|f| &f.code),
            current_attempt: self.current_attempt_id(),
        };

        let next = match transition(self.state, ctx, &event) {
            Ok(next) => next,
            Err(e) => {
                warn!("Payment {} rejected {}: {}", self.intent.id, event.name(), e);
                return Err(e);
            }
        };

        // Guards that need the intent itself
        if let PaymentEvent::CashReceived { tendered } = &event {
            if *tendered < self.intent.amount {
                return Err(TransitionError::InsufficientTender {
                    tendered: *tendered,
                    amount: self.intent.amount,
                });
            }
        }

        debug!("Payment {}: {} --{}--> {}", self.intent.id, self.state, event.name(), next);

        let previous = self.state;
        let mut effects = Vec::new();

        match event {
            PaymentEvent::Start { method } => {
                self.method = Some(method);
                self.open_attempt(method, now);
            }
            PaymentEvent::Retry => {
                effects.push(Effect::ClearTimeout);
                self.error = None;
                self.qr = None;
                if let Some(method) = self.method {
                    self.open_attempt(method, now);
                }
            }
            PaymentEvent::DeviceReconnected => {
                effects.push(Effect::ClearTimeout);
                self.error = None;
                self.open_attempt(PaymentMethod::Card, now);
            }
            PaymentEvent::QrGenerated { qr } => {
                self.qr = Some(qr);
            }
            PaymentEvent::CardDetected { entry_mode } => {
                if let Some(AttemptDetails::Card(card)) = self.current_details_mut() {
                    card.entry_mode = Some(entry_mode);
                }
            }
            PaymentEvent::UpiScanStarted { payer_handle } => {
                if let Some(AttemptDetails::Upi(upi)) = self.current_details_mut() {
                    upi.payer_handle = payer_handle;
                }
            }
            PaymentEvent::ProcessingStarted { message } => {
                if let Some(message) = message {
                    self.status_text = message;
                    return Ok(effects);
                }
            }
            PaymentEvent::PaymentSuccess { receipt } => {
                self.record_receipt(receipt);
            }
            PaymentEvent::CashReceived { tendered } => {
                let change_due = tendered - self.intent.amount;
                if let Some(attempt) = self.intent.current_attempt_mut() {
                    attempt.details = Some(AttemptDetails::Cash(CashDetails { tendered, change_due }));
                }
            }
            PaymentEvent::PaymentFailed { code, message } => {
                self.fail_current(PaymentFailure::new(code, message));
            }
            PaymentEvent::DeviceDisconnected => {
                self.fail_current(PaymentFailure::new(FailureCode::PosDisconnected, "POS disconnected"));
            }
            PaymentEvent::Timeout { .. } => {
                if self.method == Some(PaymentMethod::Upi) {
                    self.qr = None;
                }
            }
            PaymentEvent::SdkReady | PaymentEvent::Cancel => {}
        }

        self.state = next;
        self.sync_records(now);
        self.status_text = self.describe();

        if next.is_terminal() && !previous.is_terminal() {
            effects.push(Effect::ClearTimeout);
            info!("Payment {} reached {} ({})", self.intent.id, next, self.status_text);
        }

        Ok(effects)
    }

    fn open_attempt(&mut self, method: PaymentMethod, now: DateTime<Utc>) {
        let attempt = PaymentAttempt::new(method, now);
        debug!("Payment {} opened attempt {} ({})", self.intent.id, attempt.id, method);
        self.intent.attempts.push(attempt);
    }

    fn current_details_mut(&mut self) -> Option<&mut AttemptDetails> {
        self.intent.current_attempt_mut().and_then(|a| a.details.as_mut())
    }

    fn record_receipt(&mut self, receipt: PaymentReceipt) {
        let details = match receipt {
            PaymentReceipt::Card { last4, auth_code, rrn } => {
                let entry_mode = match self.current_details_mut() {
                    Some(AttemptDetails::Card(card)) => card.entry_mode,
                    _ => None,
                };
                AttemptDetails::Card(CardDetails { entry_mode, last4, auth_code, rrn })
            }
            PaymentReceipt::Upi { payer_handle, utr, rrn } => {
                let known_handle = match self.current_details_mut() {
                    Some(AttemptDetails::Upi(upi)) => upi.payer_handle.clone(),
                    _ => None,
                };
                AttemptDetails::Upi(UpiDetails { payer_handle: payer_handle.or(known_handle), utr, rrn })
            }
        };
        if let Some(attempt) = self.intent.current_attempt_mut() {
            attempt.details = Some(details);
        }
    }

    fn fail_current(&mut self, failure: PaymentFailure) {
        if let Some(attempt) = self.intent.current_attempt_mut() {
            attempt.failure = Some(failure.clone());
        }
        self.error = Some(failure);
    }

    fn sync_records(&mut self, now: DateTime<Utc>) {
        let state = self.state;
        if let (Some(status), Some(attempt)) = (state.attempt_status(), self.intent.current_attempt_mut()) {
            attempt.status = status;
            if status.is_terminal() && attempt.completed_at.is_none() {
                attempt.completed_at = Some(now);
            }
        }
        self.intent.status = if self.intent.has_succeeded_attempt() {
            IntentStatus::Succeeded
        } else {
            state.intent_status()
        };
    }

    fn describe(&self) -> String {
        use PaymentMethod::*;
        use PaymentState::*;

        let text = match (self.state, self.method) {
            (Idle, _) => "Select a payment method",
            (Initializing, Some(Card)) => "Connecting to card reader",
            (Initializing, Some(Upi)) => "Generating UPI QR code",
            (Initializing, _) => "Collect cash from the patient",
            (AwaitingInput, Some(Upi)) => "Ask the patient to scan the QR code",
            (AwaitingInput, _) => "Tap, insert or swipe the card",
            (Processing, Some(Upi)) => "Waiting for UPI confirmation",
            (Processing, _) => "Processing card payment",
            (Succeeded, _) => "Payment successful",
            (Failed, _) => {
                return self
                    .error
                    .as_ref()
                    .map(|f| f.message.clone())
                    .unwrap_or_else(|| "Payment failed".to_string())
            }
            (TimedOut, Some(Upi)) => "QR code expired before payment",
            (TimedOut, _) => "Card reader timed out",
            (Cancelled, _) => "Payment cancelled",
        };
        text.to_string()
    }
}

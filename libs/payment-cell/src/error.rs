use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{MinorUnits, PaymentMethod};
use crate::services::state_machine::PaymentState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Event {event} not accepted in state {state}")]
    Rejected { state: PaymentState, event: &'static str },

    #[error("Event {event} does not apply to {method} payments")]
    MethodMismatch { method: PaymentMethod, event: &'static str },

    #[error("Timeout for attempt {attempt_id} is stale")]
    StaleTimeout { attempt_id: Uuid },

    #[error("Tendered {tendered} is less than the amount due {amount}")]
    InsufficientTender { tendered: MinorUnits, amount: MinorUnits },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("Split has no rows")]
    NoRows,

    #[error("Split row {0} not found")]
    RowNotFound(Uuid),

    #[error("The last split row cannot be removed")]
    LastRow,

    #[error("Split row {row_id} has a negative amount")]
    NegativeAmount { row_id: Uuid },

    #[error("Split rows add up to {allocated}, expected {total_due}")]
    Unreconciled { allocated: MinorUnits, total_due: MinorUnits },

    #[error("Total due {0} is negative")]
    NegativeTotal(MinorUnits),

    #[error("Split rows add up to more than can be represented")]
    AmountOverflow,
}

#[derive(Error, Debug)]
pub enum UpiGatewayError {
    #[error("UPI gateway error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected UPI gateway response: {0}")]
    Decode(String),

    #[error("UPI gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Payment session {0} not found")]
    SessionNotFound(Uuid),

    #[error("UPI collection is not configured")]
    UpiUnavailable,

    #[error(transparent)]
    Gateway(#[from] UpiGatewayError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("Invalid payment request: {0}")]
    Validation(String),
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Transition(e) => AppError::Conflict(e.to_string()),
            PaymentError::SessionNotFound(_) => AppError::NotFound(err.to_string()),
            PaymentError::UpiUnavailable | PaymentError::Gateway(_) => {
                AppError::ExternalService(err.to_string())
            }
            PaymentError::Allocation(e) => AppError::ValidationError(e.to_string()),
            PaymentError::Validation(msg) => AppError::ValidationError(msg),
        }
    }
}

impl From<AllocationError> for AppError {
    fn from(err: AllocationError) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_models::error::AppError;

use crate::error::PaymentError;
use crate::models::{MinorUnits, PaymentIntent, PaymentMethod, PaymentPurpose};
use crate::router::PaymentCellState;
use crate::services::card::CardReaderEvent;
use crate::services::split::{SplitAllocator, SplitRow};
use crate::services::state_machine::PaymentSnapshot;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub amount: MinorUnits,
    pub purpose: Option<PaymentPurpose>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct StartPaymentRequest {
    pub method: PaymentMethod,
}

#[derive(Debug, Deserialize)]
pub struct CashReceivedRequest {
    pub tendered: MinorUnits,
}

#[derive(Debug, Deserialize)]
pub struct SplitRowInput {
    pub id: Option<Uuid>,
    pub method: PaymentMethod,
    pub amount: MinorUnits,
    #[serde(default)]
    pub is_user_edited: bool,
}

#[derive(Debug, Deserialize)]
pub struct SplitPreviewRequest {
    pub total_due: MinorUnits,
    pub rows: Vec<SplitRowInput>,
}

// ==============================================================================
// PAYMENT SESSIONS
// ==============================================================================

/// Reply with the snapshot; a closed session is dropped once its final state is served.
async fn reply(state: &PaymentCellState, snapshot: PaymentSnapshot) -> Json<Value> {
    if snapshot.state.is_closed() {
        state.registry.remove(snapshot.intent.id).await;
    }
    Json(json!(snapshot))
}

#[axum::debug_handler]
pub async fn create_session(
    State(state): State<Arc<PaymentCellState>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if request.amount <= 0 {
        return Err(PaymentError::Validation("Amount must be positive".to_string()).into());
    }

    let mut intent = PaymentIntent::new(
        request.amount,
        request.purpose.unwrap_or(PaymentPurpose::Settlement),
    );
    if let Some(expires_at) = request.expires_at {
        intent = intent.with_expiry(expires_at);
    }

    let session = state.registry.open(intent).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "session_id": session.id(),
            "payment": session.snapshot(),
        })),
    ))
}

#[axum::debug_handler]
pub async fn get_session(
    State(state): State<Arc<PaymentCellState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let session = state.registry.get(session_id).await?;
    Ok(reply(&state, session.snapshot()).await)
}

#[axum::debug_handler]
pub async fn start_payment(
    State(state): State<Arc<PaymentCellState>>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<StartPaymentRequest>,
) -> Result<Json<Value>, AppError> {
    let session = state.registry.get(session_id).await?;
    let snapshot = session.start(request.method).await?;
    Ok(reply(&state, snapshot).await)
}

/// Callback endpoint for the card terminal bridge.
#[axum::debug_handler]
pub async fn card_reader_event(
    State(state): State<Arc<PaymentCellState>>,
    Path(session_id): Path<Uuid>,
    Json(event): Json<CardReaderEvent>,
) -> Result<Json<Value>, AppError> {
    debug!("Card reader event for session {}: {:?}", session_id, event);
    let session = state.registry.get(session_id).await?;
    let snapshot = session.on_card_reader_event(event).await?;
    Ok(reply(&state, snapshot).await)
}

#[axum::debug_handler]
pub async fn cash_received(
    State(state): State<Arc<PaymentCellState>>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<CashReceivedRequest>,
) -> Result<Json<Value>, AppError> {
    let session = state.registry.get(session_id).await?;
    let snapshot = session.cash_received(request.tendered).await?;
    Ok(reply(&state, snapshot).await)
}

#[axum::debug_handler]
pub async fn cancel_payment(
    State(state): State<Arc<PaymentCellState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let session = state.registry.get(session_id).await?;
    let snapshot = session.cancel().await?;
    Ok(reply(&state, snapshot).await)
}

#[axum::debug_handler]
pub async fn retry_payment(
    State(state): State<Arc<PaymentCellState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let session = state.registry.get(session_id).await?;
    let snapshot = session.retry().await?;
    Ok(reply(&state, snapshot).await)
}

// ==============================================================================
// SPLIT PAYMENTS
// ==============================================================================

#[axum::debug_handler]
pub async fn preview_split(
    Json(request): Json<SplitPreviewRequest>,
) -> Result<Json<Value>, AppError> {
    let rows = request
        .rows
        .into_iter()
        .map(|row| SplitRow {
            id: row.id.unwrap_or_else(Uuid::new_v4),
            method: row.method,
            amount: row.amount,
            is_user_edited: row.is_user_edited,
        })
        .collect();
    let split = SplitAllocator::from_rows(request.total_due, rows);
    let legs = split.payment_legs()?;

    Ok(Json(json!({
        "total_due": split.total_due(),
        "allocated": split.allocated(),
        "has_mixed_payment": split.has_mixed_payment(),
        "legs": legs,
    })))
}

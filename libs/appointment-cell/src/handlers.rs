use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use payment_cell::{MinorUnits, PaymentMethod, PaymentPurpose, SplitAllocator, SplitRow};
use shared_models::error::AppError;

use crate::models::{
    BookingDetails, CheckoutError, ConsultationMode, HoldCountdown, HoldError, TimeSlot,
};
use crate::router::{DeskSession, HoldCellState};
use crate::services::checkout::BookingCheckout;

/// Header identifying which front-desk session a request belongs to.
pub const DESK_SESSION_HEADER: &str = "x-desk-session";

#[derive(Debug, Deserialize)]
pub struct HoldSlotRequest {
    pub doctor_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub mode: Option<ConsultationMode>,
    pub location_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRow {
    pub method: PaymentMethod,
    pub amount: MinorUnits,
}

#[derive(Debug, Deserialize)]
pub struct BeginCheckoutRequest {
    pub total_due: MinorUnits,
    pub rows: Vec<CheckoutRow>,
    pub purpose: Option<PaymentPurpose>,
}

fn desk_key(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(DESK_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest(format!("Missing {} header", DESK_SESSION_HEADER)))
}

/// Only taking a hold starts a desk session; every other route reads an existing one.
async fn desk_for(state: &HoldCellState, headers: &HeaderMap) -> Result<Arc<DeskSession>, AppError> {
    let key = desk_key(headers)?;
    Ok(state.desk(&key).await)
}

async fn existing_desk(
    state: &HoldCellState,
    headers: &HeaderMap,
) -> Result<Option<Arc<DeskSession>>, AppError> {
    let key = desk_key(headers)?;
    Ok(state.find_desk(&key).await)
}

// ==============================================================================
// HOLDS
// ==============================================================================

#[axum::debug_handler]
pub async fn hold_slot(
    State(state): State<Arc<HoldCellState>>,
    headers: HeaderMap,
    Json(request): Json<HoldSlotRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if request.end <= request.start {
        return Err(AppError::ValidationError("Slot end must be after its start".to_string()));
    }

    let desk = desk_for(&state, &headers).await?;

    // A new hold supersedes any checkout built on the previous one.
    if let Some(stale) = desk.checkout.lock().await.take() {
        if let Err(e) = stale.abandon().await {
            warn!("Dropping checkout for hold {}: {}", stale.hold().hold_id, e);
        }
    }

    let slot = TimeSlot {
        doctor_id: request.doctor_id,
        start: request.start,
        end: request.end,
        mode: request.mode.unwrap_or_default(),
        location_id: request.location_id,
    };
    let handle = desk.coordinator.hold_slot(slot).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "hold": handle,
            "remaining_secs": handle.remaining_secs(Utc::now()),
        })),
    ))
}

#[axum::debug_handler]
pub async fn get_current_hold(
    State(state): State<Arc<HoldCellState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let Some(desk) = existing_desk(&state, &headers).await? else {
        return Ok(Json(json!({
            "hold": null,
            "countdown": HoldCountdown::Idle,
        })));
    };
    let hold = desk.coordinator.current_hold().await;
    let countdown = desk.coordinator.countdown().borrow().clone();

    Ok(Json(json!({
        "hold": hold,
        "countdown": countdown,
    })))
}

#[axum::debug_handler]
pub async fn release_hold(
    State(state): State<Arc<HoldCellState>>,
    headers: HeaderMap,
    Path(hold_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let Some(desk) = existing_desk(&state, &headers).await? else {
        debug!("Release for hold {} from a desk with no session", hold_id);
        return Ok(Json(json!({ "released": false })));
    };

    let Some(handle) = desk.coordinator.handle_for(hold_id).await else {
        debug!("Release for hold {} that is not current", hold_id);
        return Ok(Json(json!({ "released": false })));
    };

    let mut checkout = desk.checkout.lock().await;
    if checkout.as_ref().map(|c| c.hold().hold_id) == Some(hold_id) {
        if let Some(active) = checkout.take() {
            active.abandon().await?;
        }
    } else {
        desk.coordinator.release_hold(&handle).await?;
    }

    Ok(Json(json!({ "released": true })))
}

#[axum::debug_handler]
pub async fn confirm_booking(
    State(state): State<Arc<HoldCellState>>,
    headers: HeaderMap,
    Path(hold_id): Path<Uuid>,
    Json(details): Json<BookingDetails>,
) -> Result<Json<Value>, AppError> {
    let desk = existing_desk(&state, &headers)
        .await?
        .ok_or(HoldError::HoldExpired)?;
    let handle = desk
        .coordinator
        .handle_for(hold_id)
        .await
        .ok_or(HoldError::HoldExpired)?;

    let mut checkout = desk.checkout.lock().await;
    let attached = checkout.as_ref().is_some_and(|c| c.hold().hold_id == hold_id);
    if !attached {
        let booking = desk.coordinator.confirm_booking(&handle, details).await?;
        return Ok(Json(json!({ "booking": booking })));
    }

    // Payments attached to this hold must settle first.
    let Some(active) = checkout.as_ref() else {
        return Err(CheckoutError::NotStarted(hold_id).into());
    };
    let booking = active.complete(details).await;
    if matches!(booking, Ok(_) | Err(CheckoutError::Hold(_))) {
        checkout.take();
    }

    Ok(Json(json!({ "booking": booking? })))
}

#[axum::debug_handler]
pub async fn close_desk_session(
    State(state): State<Arc<HoldCellState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let key = desk_key(&headers)?;
    let closed = state.close_desk(&key).await;
    Ok(Json(json!({ "closed": closed })))
}

// ==============================================================================
// CHECKOUT
// ==============================================================================

#[axum::debug_handler]
pub async fn begin_checkout(
    State(state): State<Arc<HoldCellState>>,
    headers: HeaderMap,
    Path(hold_id): Path<Uuid>,
    Json(request): Json<BeginCheckoutRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let desk = existing_desk(&state, &headers)
        .await?
        .ok_or(HoldError::HoldExpired)?;
    let handle = desk
        .coordinator
        .handle_for(hold_id)
        .await
        .ok_or(HoldError::HoldExpired)?;

    let mut checkout = desk.checkout.lock().await;
    if checkout.is_some() {
        return Err(AppError::Conflict("A checkout is already in progress".to_string()));
    }

    let rows = request
        .rows
        .into_iter()
        .map(|row| SplitRow::new(row.method, row.amount))
        .collect();
    let split = SplitAllocator::from_rows(request.total_due, rows);

    let started = BookingCheckout::begin(
        Arc::clone(&desk.coordinator),
        handle,
        &split,
        request.purpose.unwrap_or(PaymentPurpose::Settlement),
        &state.payments,
    )
    .await?;
    let legs = started.view();
    *checkout = Some(started);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "hold_id": hold_id,
            "has_mixed_payment": split.has_mixed_payment(),
            "legs": legs,
        })),
    ))
}

#[axum::debug_handler]
pub async fn get_checkout(
    State(state): State<Arc<HoldCellState>>,
    headers: HeaderMap,
    Path(hold_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let desk = existing_desk(&state, &headers)
        .await?
        .ok_or(CheckoutError::NotStarted(hold_id))?;
    let checkout = desk.checkout.lock().await;
    let active = checkout
        .as_ref()
        .filter(|c| c.hold().hold_id == hold_id)
        .ok_or(CheckoutError::NotStarted(hold_id))?;

    Ok(Json(json!({
        "hold_id": hold_id,
        "legs": active.view(),
        "outstanding": active.outstanding(),
    })))
}

#[axum::debug_handler]
pub async fn complete_checkout(
    State(state): State<Arc<HoldCellState>>,
    headers: HeaderMap,
    Path(hold_id): Path<Uuid>,
    Json(details): Json<BookingDetails>,
) -> Result<Json<Value>, AppError> {
    let desk = existing_desk(&state, &headers)
        .await?
        .ok_or(CheckoutError::NotStarted(hold_id))?;
    let mut checkout = desk.checkout.lock().await;
    let active = checkout
        .as_ref()
        .filter(|c| c.hold().hold_id == hold_id)
        .ok_or(CheckoutError::NotStarted(hold_id))?;

    let booking = active.complete(details).await;
    if matches!(booking, Ok(_) | Err(CheckoutError::Hold(_))) {
        // Either booked or the hold is gone; nothing left to pay for.
        checkout.take();
    }

    Ok(Json(json!({ "booking": booking? })))
}

#[axum::debug_handler]
pub async fn abandon_checkout(
    State(state): State<Arc<HoldCellState>>,
    headers: HeaderMap,
    Path(hold_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let desk = existing_desk(&state, &headers)
        .await?
        .ok_or(CheckoutError::NotStarted(hold_id))?;
    let mut checkout = desk.checkout.lock().await;
    if checkout.as_ref().map(|c| c.hold().hold_id) != Some(hold_id) {
        return Err(CheckoutError::NotStarted(hold_id).into());
    }
    if let Some(active) = checkout.take() {
        active.abandon().await?;
    }

    Ok(Json(json!({ "abandoned": true })))
}

// libs/appointment-cell/src/services/checkout.rs
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use payment_cell::{
    PaymentIntent, PaymentLeg, PaymentPurpose, PaymentSession, PaymentSessionRegistry,
    PaymentState, SplitAllocator,
};

use crate::models::{Booking, BookingDetails, CheckoutError, HoldError, HoldHandle};
use crate::services::hold::SlotHoldCoordinator;

/// One payment leg and the session collecting it.
#[derive(Clone)]
pub struct CheckoutLeg {
    pub leg: PaymentLeg,
    pub session: PaymentSession,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutLegView {
    pub session_id: Uuid,
    #[serde(flatten)]
    pub leg: PaymentLeg,
    pub state: PaymentState,
}

/// Hold plus the payments that must settle before it becomes a booking.
///
/// Legs are listed in execution order, cash first. Sequencing is up to the
/// caller: each leg is an independent session and nothing here refuses to
/// start a device leg while an earlier one is still outstanding. Booking only
/// happens once every leg has succeeded, whatever order they ran in.
///
/// Leg sessions are dropped from the registry once the checkout ends.
pub struct BookingCheckout {
    coordinator: Arc<SlotHoldCoordinator>,
    handle: HoldHandle,
    legs: Vec<CheckoutLeg>,
    payments: PaymentSessionRegistry,
}

impl fmt::Debug for BookingCheckout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookingCheckout")
            .field("hold_id", &self.handle.hold_id)
            .field("legs", &self.view())
            .finish()
    }
}

impl BookingCheckout {
    /// Validate the split and open one payment session per leg, cash first.
    pub async fn begin(
        coordinator: Arc<SlotHoldCoordinator>,
        handle: HoldHandle,
        split: &SplitAllocator,
        purpose: PaymentPurpose,
        payments: &PaymentSessionRegistry,
    ) -> Result<Self, CheckoutError> {
        if handle.owner != coordinator.owner() {
            return Err(HoldError::NotOwner.into());
        }
        if coordinator.handle_for(handle.hold_id).await.is_none() {
            return Err(HoldError::HoldExpired.into());
        }

        let plan = split.payment_legs()?;

        let mut legs = Vec::with_capacity(plan.len());
        for leg in plan {
            let intent = PaymentIntent::new(leg.amount, purpose).with_expiry(handle.expires_at);
            let session = payments.open(intent).await;
            legs.push(CheckoutLeg { leg, session });
        }

        info!(
            "Checkout for hold {} opened with {} leg(s), mixed: {}",
            handle.hold_id,
            legs.len(),
            split.has_mixed_payment()
        );
        Ok(Self {
            coordinator,
            handle,
            legs,
            payments: payments.clone(),
        })
    }

    pub fn hold(&self) -> &HoldHandle {
        &self.handle
    }

    pub fn legs(&self) -> &[CheckoutLeg] {
        &self.legs
    }

    pub fn view(&self) -> Vec<CheckoutLegView> {
        self.legs
            .iter()
            .map(|l| CheckoutLegView {
                session_id: l.session.id(),
                leg: l.leg.clone(),
                state: l.session.snapshot().state,
            })
            .collect()
    }

    /// Sessions that have not succeeded yet, in execution order.
    pub fn outstanding(&self) -> Vec<Uuid> {
        self.legs
            .iter()
            .filter(|l| l.session.snapshot().state != PaymentState::Succeeded)
            .map(|l| l.session.id())
            .collect()
    }

    /// Promote the hold once every leg has been paid. Past the outstanding
    /// check the checkout is over either way, so leg sessions are dropped
    /// whether or not the hold could be promoted.
    pub async fn complete(&self, details: BookingDetails) -> Result<Booking, CheckoutError> {
        let outstanding = self.outstanding();
        if !outstanding.is_empty() {
            return Err(CheckoutError::PaymentsOutstanding { outstanding });
        }
        let booking = self.coordinator.confirm_booking(&self.handle, details).await;
        self.forget_sessions().await;
        Ok(booking?)
    }

    /// Stop unfinished payments and give the slot back.
    pub async fn abandon(&self) -> Result<(), CheckoutError> {
        self.cancel_open_legs().await;
        self.forget_sessions().await;
        self.coordinator.release_hold(&self.handle).await?;
        Ok(())
    }

    async fn cancel_open_legs(&self) {
        for leg in &self.legs {
            if leg.session.snapshot().state.is_terminal() {
                continue;
            }
            if let Err(e) = leg.session.cancel().await {
                warn!("Could not cancel payment session {}: {}", leg.session.id(), e);
            }
        }
    }

    async fn forget_sessions(&self) {
        for leg in &self.legs {
            self.payments.remove(leg.session.id()).await;
        }
    }
}

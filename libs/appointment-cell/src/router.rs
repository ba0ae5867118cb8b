// libs/appointment-cell/src/router.rs
use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use payment_cell::PaymentSessionRegistry;

use crate::handlers;
use crate::models::HoldConfig;
use crate::services::checkout::BookingCheckout;
use crate::services::hold::SlotHoldCoordinator;
use crate::services::store::SlotClaimStore;

/// Per-desk state: one coordinator and at most one checkout in flight.
pub struct DeskSession {
    pub coordinator: Arc<SlotHoldCoordinator>,
    pub checkout: Mutex<Option<BookingCheckout>>,
}

pub struct HoldCellState {
    store: Arc<dyn SlotClaimStore>,
    hold_config: HoldConfig,
    desks: RwLock<HashMap<String, Arc<DeskSession>>>,
    pub payments: PaymentSessionRegistry,
}

impl HoldCellState {
    pub fn new(
        store: Arc<dyn SlotClaimStore>,
        hold_config: HoldConfig,
        payments: PaymentSessionRegistry,
    ) -> Self {
        Self {
            store,
            hold_config,
            desks: RwLock::new(HashMap::new()),
            payments,
        }
    }

    /// Desk session for `key`, created on first use.
    pub async fn desk(&self, key: &str) -> Arc<DeskSession> {
        if let Some(desk) = self.desks.read().await.get(key) {
            return Arc::clone(desk);
        }

        let mut desks = self.desks.write().await;
        let desk = desks.entry(key.to_string()).or_insert_with(|| {
            info!("New front-desk session {}", key);
            Arc::new(DeskSession {
                coordinator: Arc::new(SlotHoldCoordinator::new(
                    Arc::clone(&self.store),
                    self.hold_config,
                )),
                checkout: Mutex::new(None),
            })
        });
        Arc::clone(desk)
    }

    /// Desk session for `key` if one has been started.
    pub async fn find_desk(&self, key: &str) -> Option<Arc<DeskSession>> {
        self.desks.read().await.get(key).cloned()
    }

    pub async fn desk_count(&self) -> usize {
        self.desks.read().await.len()
    }

    /// Tear a desk session down, giving back its hold.
    pub async fn close_desk(&self, key: &str) -> bool {
        let Some(desk) = self.desks.write().await.remove(key) else {
            return false;
        };
        if let Some(checkout) = desk.checkout.lock().await.take() {
            if let Err(e) = checkout.abandon().await {
                warn!("Dropping checkout for hold {}: {}", checkout.hold().hold_id, e);
            }
        }
        desk.coordinator.release_current().await;
        info!("Closed front-desk session {}", key);
        true
    }
}

pub fn hold_routes(state: Arc<HoldCellState>) -> Router {
    Router::new()
        .route("/", post(handlers::hold_slot))
        .route("/current", get(handlers::get_current_hold))
        .route("/session", delete(handlers::close_desk_session))
        .route("/{hold_id}", delete(handlers::release_hold))
        .route("/{hold_id}/confirm", post(handlers::confirm_booking))
        .route(
            "/{hold_id}/checkout",
            post(handlers::begin_checkout)
                .get(handlers::get_checkout)
                .delete(handlers::abandon_checkout),
        )
        .route("/{hold_id}/checkout/complete", post(handlers::complete_checkout))
        .with_state(state)
}

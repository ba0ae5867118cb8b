// libs/payment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;

use crate::handlers;
use crate::services::registry::PaymentSessionRegistry;
use crate::services::session::PaymentTimeouts;
use crate::services::upi::{HttpUpiGateway, UpiGateway};

pub struct PaymentCellState {
    pub registry: PaymentSessionRegistry,
}

impl PaymentCellState {
    /// UPI is wired only when a gateway URL is configured.
    pub fn new(config: &AppConfig) -> Self {
        let upi: Option<Arc<dyn UpiGateway>> = if config.is_upi_configured() {
            Some(Arc::new(HttpUpiGateway::new(config)))
        } else {
            None
        };
        let registry = PaymentSessionRegistry::new(PaymentTimeouts::from_config(config), upi);
        Self { registry }
    }
}

pub fn payment_routes(state: Arc<PaymentCellState>) -> Router {
    Router::new()
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/{session_id}", get(handlers::get_session))
        .route("/sessions/{session_id}/start", post(handlers::start_payment))
        .route("/sessions/{session_id}/card-reader", post(handlers::card_reader_event))
        .route("/sessions/{session_id}/cash", post(handlers::cash_received))
        .route("/sessions/{session_id}/cancel", post(handlers::cancel_payment))
        .route("/sessions/{session_id}/retry", post(handlers::retry_payment))
        .route("/splits/preview", post(handlers::preview_split))
        .with_state(state)
}

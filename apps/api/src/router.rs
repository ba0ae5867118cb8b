use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};
use tracing::{info, warn};

use appointment_cell::router::{hold_routes, HoldCellState};
use appointment_cell::{HoldConfig, InMemorySlotClaimStore, SlotClaimStore, SupabaseSlotClaimStore};
use payment_cell::router::{payment_routes, PaymentCellState};
use shared_config::{AppConfig, SlotStoreBackend};
use shared_database::supabase::SupabaseClient;

fn slot_store(config: &AppConfig) -> Arc<dyn SlotClaimStore> {
    match config.slot_store_backend {
        SlotStoreBackend::Supabase if config.is_configured() => {
            info!("Slot claims stored in Supabase at {}", config.supabase_url);
            Arc::new(SupabaseSlotClaimStore::new(Arc::new(SupabaseClient::new(config))))
        }
        SlotStoreBackend::Supabase => {
            warn!("Supabase is not configured, falling back to in-memory slot claims");
            Arc::new(InMemorySlotClaimStore::new())
        }
        SlotStoreBackend::Memory => {
            info!("Slot claims kept in memory");
            Arc::new(InMemorySlotClaimStore::new())
        }
    }
}

pub fn create_router(config: &AppConfig) -> Router {
    // Checkout legs and direct payment calls share one session registry.
    let payments = PaymentCellState::new(config);
    let holds = HoldCellState::new(
        slot_store(config),
        HoldConfig::from_config(config),
        payments.registry.clone(),
    );

    Router::new()
        .route("/", get(|| async { "Front desk API is running!" }))
        .nest("/holds", hold_routes(Arc::new(holds)))
        .nest("/payments", payment_routes(Arc::new(payments)))
}

// libs/payment-cell/src/services/registry.rs
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PaymentError;
use crate::models::PaymentIntent;
use crate::services::session::{PaymentSession, PaymentTimeouts};
use crate::services::upi::UpiGateway;

/// Live payment sessions addressable by id, shared by the HTTP handlers.
#[derive(Clone)]
pub struct PaymentSessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, PaymentSession>>>,
    timeouts: PaymentTimeouts,
    upi: Option<Arc<dyn UpiGateway>>,
}

impl PaymentSessionRegistry {
    pub fn new(timeouts: PaymentTimeouts, upi: Option<Arc<dyn UpiGateway>>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            timeouts,
            upi,
        }
    }

    pub fn timeouts(&self) -> PaymentTimeouts {
        self.timeouts
    }

    pub async fn open(&self, intent: PaymentIntent) -> PaymentSession {
        let session = PaymentSession::new(intent, self.timeouts, self.upi.clone());
        info!("Opened payment session {}", session.id());
        self.sessions.write().await.insert(session.id(), session.clone());
        session
    }

    pub async fn get(&self, id: Uuid) -> Result<PaymentSession, PaymentError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(PaymentError::SessionNotFound(id))
    }

    /// Forget a session. Deadlines already armed still fire into it.
    pub async fn remove(&self, id: Uuid) -> Option<PaymentSession> {
        let removed = self.sessions.write().await.remove(&id);
        if removed.is_some() {
            debug!("Removed payment session {}", id);
        }
        removed
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

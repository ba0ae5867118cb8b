// libs/payment-cell/src/services/session.rs
//
// Async driver around one PaymentStateMachine. The machine stays synchronous;
// this type performs its effects (attempt deadlines), talks to the UPI
// gateway and feeds card-reader callbacks in as events.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::error::{PaymentError, TransitionError};
use crate::models::{FailureCode, MinorUnits, PaymentIntent, PaymentMethod, PaymentReceipt};
use crate::services::card::CardReaderEvent;
use crate::services::state_machine::{
    Effect, PaymentEvent, PaymentSnapshot, PaymentState, PaymentStateMachine,
};
use crate::services::upi::{UpiGateway, UpiPollStatus, UpiQrRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentTimeouts {
    pub card_read: Duration,
    pub upi_qr_validity: Duration,
    pub upi_poll_interval: Duration,
}

impl PaymentTimeouts {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            card_read: config.card_read_timeout(),
            upi_qr_validity: config.upi_qr_validity(),
            upi_poll_interval: config.upi_poll_interval(),
        }
    }

    /// Attempt deadline for a method; cash attempts have none.
    pub fn for_method(&self, method: PaymentMethod) -> Option<Duration> {
        match method {
            PaymentMethod::Cash => None,
            PaymentMethod::Card => Some(self.card_read),
            PaymentMethod::Upi => Some(self.upi_qr_validity),
        }
    }
}

impl Default for PaymentTimeouts {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

type TaskSlot = StdMutex<Option<(Uuid, JoinHandle<()>)>>;

struct SessionInner {
    machine: Mutex<PaymentStateMachine>,
    timeouts: PaymentTimeouts,
    upi: Option<Arc<dyn UpiGateway>>,
    timer: TaskSlot,
    poller: TaskSlot,
    updates: watch::Sender<PaymentSnapshot>,
}

/// Cloneable handle to one payment intent being collected at the desk.
#[derive(Clone)]
pub struct PaymentSession {
    id: Uuid,
    inner: Arc<SessionInner>,
}

impl PaymentSession {
    pub fn new(
        intent: PaymentIntent,
        timeouts: PaymentTimeouts,
        upi: Option<Arc<dyn UpiGateway>>,
    ) -> Self {
        let id = intent.id;
        let machine = PaymentStateMachine::new(intent);
        let (updates, _) = watch::channel(machine.snapshot());

        Self {
            id,
            inner: Arc::new(SessionInner {
                machine: Mutex::new(machine),
                timeouts,
                upi,
                timer: StdMutex::new(None),
                poller: StdMutex::new(None),
                updates,
            }),
        }
    }

    /// Session id; same as the intent id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn snapshot(&self) -> PaymentSnapshot {
        self.inner.updates.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PaymentSnapshot> {
        self.inner.updates.subscribe()
    }

    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn start(&self, method: PaymentMethod) -> Result<PaymentSnapshot, PaymentError> {
        if method == PaymentMethod::Upi && self.inner.upi.is_none() {
            return Err(PaymentError::UpiUnavailable);
        }

        {
            let mut machine = self.inner.machine.lock().await;
            self.inner.dispatch_locked(&mut machine, PaymentEvent::Start { method })?;
        }

        if method == PaymentMethod::Upi {
            self.inner.generate_qr().await?;
        }
        Ok(self.snapshot())
    }

    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn retry(&self) -> Result<PaymentSnapshot, PaymentError> {
        let method = {
            let mut machine = self.inner.machine.lock().await;
            self.inner.dispatch_locked(&mut machine, PaymentEvent::Retry)?;
            machine.method()
        };

        if method == Some(PaymentMethod::Upi) {
            self.inner.generate_qr().await?;
        }
        Ok(self.snapshot())
    }

    pub async fn cancel(&self) -> Result<PaymentSnapshot, PaymentError> {
        self.dispatch(PaymentEvent::Cancel).await
    }

    pub async fn cash_received(&self, tendered: MinorUnits) -> Result<PaymentSnapshot, PaymentError> {
        self.dispatch(PaymentEvent::CashReceived { tendered }).await
    }

    /// Feed a terminal-bridge callback into the machine.
    pub async fn on_card_reader_event(
        &self,
        event: CardReaderEvent,
    ) -> Result<PaymentSnapshot, PaymentError> {
        let mut machine = self.inner.machine.lock().await;

        // A reader coming back after a disconnect resumes the flow instead of re-initialising.
        let resuming = machine.state() == PaymentState::Failed
            && machine.error().map(|f| &f.code) == Some(&FailureCode::PosDisconnected);
        let payment_event = match event {
            CardReaderEvent::Connected if resuming => PaymentEvent::DeviceReconnected,
            other => other
                .into_payment_event(machine.current_attempt_id())
                .ok_or(TransitionError::Rejected { state: machine.state(), event: "TIMEOUT" })?,
        };

        self.inner.dispatch_locked(&mut machine, payment_event)?;
        Ok(machine.snapshot())
    }

    /// Dispatch a raw machine event and perform its effects.
    pub async fn dispatch(&self, event: PaymentEvent) -> Result<PaymentSnapshot, PaymentError> {
        let mut machine = self.inner.machine.lock().await;
        self.inner.dispatch_locked(&mut machine, event)?;
        Ok(machine.snapshot())
    }

    /// Wait until the session reaches a terminal state.
    pub async fn settled(&self) -> PaymentSnapshot {
        let mut updates = self.subscribe();
        let settled = match updates.wait_for(|s| s.state.is_terminal()).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        settled
    }
}

impl SessionInner {
    /// Apply one event to the machine. Must be called with the machine lock held.
    fn dispatch_locked(
        self: &Arc<Self>,
        machine: &mut PaymentStateMachine,
        event: PaymentEvent,
    ) -> Result<(), TransitionError> {
        let attempt_before = machine.current_attempt_id();
        let effects = machine.dispatch(event)?;

        for effect in effects {
            self.apply(effect);
        }

        // Every fresh attempt gets its own hard deadline.
        let attempt_after = machine.current_attempt_id();
        if attempt_after != attempt_before && !machine.state().is_terminal() {
            let deadline = machine.method().and_then(|m| self.timeouts.for_method(m));
            if let Some(effect) = deadline.and_then(|after| machine.start_timeout(after)) {
                self.apply(effect);
            }
        }

        self.updates.send_replace(machine.snapshot());
        Ok(())
    }

    fn apply(self: &Arc<Self>, effect: Effect) {
        match effect {
            Effect::ScheduleTimeout { attempt_id, after } => self.schedule_timeout(attempt_id, after),
            Effect::ClearTimeout => {
                abort_slot(&self.timer);
                abort_slot(&self.poller);
            }
        }
    }

    fn schedule_timeout(self: &Arc<Self>, attempt_id: Uuid, after: Duration) {
        debug!("Arming {:?} deadline for attempt {}", after, attempt_id);
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let mut machine = inner.machine.lock().await;
            take_own(&inner.timer, attempt_id);
            match inner.dispatch_locked(&mut machine, PaymentEvent::Timeout { attempt_id }) {
                Ok(()) => info!("Attempt {} timed out", attempt_id),
                Err(e) => debug!("Deadline for attempt {} ignored: {}", attempt_id, e),
            }
        });
        replace_slot(&self.timer, attempt_id, handle);
    }

    /// Ask the gateway for a QR for the current attempt and start polling it.
    async fn generate_qr(self: &Arc<Self>) -> Result<(), PaymentError> {
        let gateway = self.upi.clone().ok_or(PaymentError::UpiUnavailable)?;

        let request = {
            let machine = self.machine.lock().await;
            let attempt_id = machine
                .current_attempt_id()
                .ok_or_else(|| PaymentError::Validation("No open UPI attempt".to_string()))?;
            UpiQrRequest {
                intent_id: machine.intent().id,
                attempt_id,
                amount: machine.intent().amount,
                validity_seconds: self.timeouts.upi_qr_validity.as_secs(),
            }
        };

        let qr = gateway.create_qr(&request).await?;
        let reference = qr.reference.clone();

        let mut machine = self.machine.lock().await;
        if machine.current_attempt_id() != Some(request.attempt_id)
            || machine.state() != PaymentState::Initializing
        {
            // Cancelled or timed out while the gateway was answering.
            warn!("Discarding QR {} for superseded attempt {}", reference, request.attempt_id);
            return Ok(());
        }
        self.dispatch_locked(&mut machine, PaymentEvent::QrGenerated { qr })?;
        self.spawn_poller(request.attempt_id, reference, gateway);
        Ok(())
    }

    fn spawn_poller(self: &Arc<Self>, attempt_id: Uuid, reference: String, gateway: Arc<dyn UpiGateway>) {
        let inner = Arc::clone(self);
        let every = self.timeouts.upi_poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            loop {
                ticker.tick().await;

                let status = match gateway.poll_status(&reference).await {
                    Ok(status) => status,
                    Err(e) => {
                        warn!("UPI poll for {} failed, will retry: {}", reference, e);
                        continue;
                    }
                };

                let mut machine = inner.machine.lock().await;
                if machine.current_attempt_id() != Some(attempt_id) || machine.state().is_terminal() {
                    break;
                }

                let awaiting = machine.state() == PaymentState::AwaitingInput;
                let (events, finished) = match status {
                    UpiPollStatus::Pending => continue,
                    UpiPollStatus::Scanned { payer_handle } => {
                        if !awaiting {
                            continue;
                        }
                        (vec![PaymentEvent::UpiScanStarted { payer_handle }], false)
                    }
                    UpiPollStatus::Success(receipt) => {
                        let mut events = Vec::with_capacity(2);
                        if awaiting {
                            let payer_handle = match &receipt {
                                PaymentReceipt::Upi { payer_handle, .. } => payer_handle.clone(),
                                PaymentReceipt::Card { .. } => None,
                            };
                            events.push(PaymentEvent::UpiScanStarted { payer_handle });
                        }
                        events.push(PaymentEvent::PaymentSuccess { receipt });
                        (events, true)
                    }
                    UpiPollStatus::Failed { code, message } => {
                        let mut events = Vec::with_capacity(2);
                        if awaiting {
                            events.push(PaymentEvent::UpiScanStarted { payer_handle: None });
                        }
                        events.push(PaymentEvent::PaymentFailed { code, message });
                        (events, true)
                    }
                };

                if finished {
                    take_own(&inner.poller, attempt_id);
                }
                for event in events {
                    if let Err(e) = inner.dispatch_locked(&mut machine, event) {
                        warn!("UPI status for {} not applied: {}", reference, e);
                        break;
                    }
                }
                if finished {
                    break;
                }
            }
            debug!("UPI poller for {} stopped", reference);
        });
        replace_slot(&self.poller, attempt_id, handle);
    }
}

fn replace_slot(slot: &TaskSlot, attempt_id: Uuid, handle: JoinHandle<()>) {
    let previous = slot
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .replace((attempt_id, handle));
    if let Some((_, old)) = previous {
        old.abort();
    }
}

fn abort_slot(slot: &TaskSlot) {
    if let Some((_, handle)) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
        handle.abort();
    }
}

/// Remove a task's own entry without aborting it, so effects it triggers
/// cannot cancel the task mid-dispatch.
fn take_own(slot: &TaskSlot, attempt_id: Uuid) {
    let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if matches!(guard.as_ref(), Some((id, _)) if *id == attempt_id) {
        guard.take();
    }
}

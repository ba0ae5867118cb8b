// libs/appointment-cell/src/services/hold.rs
//
// One front-desk session's claim on a slot. The store decides who owns a
// slot; this type only tracks the hold it created, drives the countdown and
// lets go of the row when the deadline passes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    Booking, BookingDetails, HoldConfig, HoldCountdown, HoldError, HoldHandle, StoreError, TimeSlot,
};
use crate::services::store::SlotClaimStore;

struct ActiveHold {
    handle: HoldHandle,
    ticker: JoinHandle<()>,
    expiry: JoinHandle<()>,
}

impl ActiveHold {
    fn stop_timers(&self) {
        self.ticker.abort();
        self.expiry.abort();
    }
}

pub struct SlotHoldCoordinator {
    owner: Uuid,
    store: Arc<dyn SlotClaimStore>,
    config: HoldConfig,
    active: Arc<Mutex<Option<ActiveHold>>>,
    countdown: Arc<watch::Sender<HoldCountdown>>,
}

impl SlotHoldCoordinator {
    pub fn new(store: Arc<dyn SlotClaimStore>, config: HoldConfig) -> Self {
        let (countdown, _) = watch::channel(HoldCountdown::Idle);
        Self {
            owner: Uuid::new_v4(),
            store,
            config,
            active: Arc::new(Mutex::new(None)),
            countdown: Arc::new(countdown),
        }
    }

    /// Token stamped on every handle and store row this coordinator creates.
    pub fn owner(&self) -> Uuid {
        self.owner
    }

    pub fn countdown(&self) -> watch::Receiver<HoldCountdown> {
        self.countdown.subscribe()
    }

    pub async fn current_hold(&self) -> Option<HoldHandle> {
        self.active.lock().await.as_ref().map(|a| a.handle.clone())
    }

    /// Handle for `hold_id` if it is the hold currently owned.
    pub async fn handle_for(&self, hold_id: Uuid) -> Option<HoldHandle> {
        self.current_hold().await.filter(|h| h.hold_id == hold_id)
    }

    /// Claim `slot`, releasing any hold this coordinator already owns.
    #[instrument(skip(self, slot), fields(owner = %self.owner, slot = %slot.identity()))]
    pub async fn hold_slot(&self, slot: TimeSlot) -> Result<HoldHandle, HoldError> {
        self.release_current().await;

        let claim = match self.store.claim(&slot, self.owner, self.config.hold_duration).await {
            Ok(claim) => claim,
            Err(StoreError::Conflict(detail)) => {
                warn!("Slot {} already claimed: {}", slot.identity(), detail);
                return Err(HoldError::SlotTaken);
            }
            Err(StoreError::Backend(detail)) => {
                error!("Could not claim slot {}: {}", slot.identity(), detail);
                return Err(HoldError::Store(detail));
            }
        };

        let handle = HoldHandle {
            hold_id: claim.id,
            slot,
            expires_at: claim.expires_at,
            owner: self.owner,
        };

        // Store timestamp is the authority; the local deadline just mirrors it.
        let remaining = (claim.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let deadline = Instant::now() + remaining;

        let ticker = self.spawn_ticker(handle.hold_id, deadline);
        let expiry = self.spawn_expiry(handle.hold_id, deadline);

        let mut active = self.active.lock().await;
        if let Some(previous) = active.replace(ActiveHold { handle: handle.clone(), ticker, expiry }) {
            // Only reachable if callers overlap hold_slot on one coordinator.
            warn!("Replacing hold {} that was never released", previous.handle.hold_id);
            previous.stop_timers();
        }
        self.countdown.send_replace(HoldCountdown::Held {
            hold_id: handle.hold_id,
            remaining_secs: ceil_secs(remaining),
        });

        info!("Holding slot {} as {} until {}", handle.slot.identity(), handle.hold_id, handle.expires_at);
        Ok(handle)
    }

    /// Release the hold `handle` refers to. Handles for holds that are no
    /// longer current are ignored.
    pub async fn release_hold(&self, handle: &HoldHandle) -> Result<(), HoldError> {
        if handle.owner != self.owner {
            return Err(HoldError::NotOwner);
        }

        let taken = {
            let mut active = self.active.lock().await;
            match active.as_ref() {
                Some(current) if current.handle.hold_id == handle.hold_id => active.take(),
                _ => None,
            }
        };

        match taken {
            Some(hold) => self.finish_release(hold).await,
            None => debug!("Hold {} is not current, nothing to release", handle.hold_id),
        }
        Ok(())
    }

    /// Release whatever hold is owned. Never fails: store errors are logged
    /// and local state is cleared regardless.
    pub async fn release_current(&self) {
        let taken = self.active.lock().await.take();
        if let Some(hold) = taken {
            self.finish_release(hold).await;
        }
    }

    #[instrument(skip(self, handle, details), fields(hold_id = %handle.hold_id))]
    pub async fn confirm_booking(
        &self,
        handle: &HoldHandle,
        details: BookingDetails,
    ) -> Result<Booking, HoldError> {
        if handle.owner != self.owner {
            return Err(HoldError::NotOwner);
        }

        // Held across the store call so the expiry task cannot interleave.
        let mut active = self.active.lock().await;
        match active.as_ref() {
            Some(current) if current.handle.hold_id == handle.hold_id => {}
            _ => {
                warn!("Confirm for hold {} that is no longer owned", handle.hold_id);
                return Err(HoldError::HoldExpired);
            }
        }

        match self.store.promote(handle.hold_id, &details).await {
            Ok(Some(row)) => {
                if let Some(hold) = active.take() {
                    hold.stop_timers();
                }
                self.countdown.send_replace(HoldCountdown::Booked { booking_id: row.id });
                info!("Hold {} booked for patient {}", row.id, details.patient_id);
                Ok(Booking::from(row))
            }
            Ok(None) => {
                if let Some(hold) = active.take() {
                    hold.stop_timers();
                }
                self.countdown.send_replace(HoldCountdown::Expired { hold_id: handle.hold_id });
                warn!("Hold {} expired before it could be booked", handle.hold_id);
                Err(HoldError::HoldExpired)
            }
            Err(e) => {
                // Hold stays owned; the caller may try again before the deadline.
                error!("Booking hold {} failed: {}", handle.hold_id, e);
                Err(HoldError::Store(e.to_string()))
            }
        }
    }

    async fn finish_release(&self, hold: ActiveHold) {
        hold.stop_timers();
        let hold_id = hold.handle.hold_id;
        self.countdown.send_replace(HoldCountdown::Released { hold_id });

        match self.store.cancel(hold_id).await {
            Ok(true) => info!("Released hold {}", hold_id),
            Ok(false) => debug!("Hold {} was already gone from the store", hold_id),
            Err(e) => warn!("Could not cancel hold {}, expiry will free it: {}", hold_id, e),
        }
    }

    fn spawn_ticker(&self, hold_id: Uuid, deadline: Instant) -> JoinHandle<()> {
        let countdown = Arc::clone(&self.countdown);
        let tick = self.config.countdown_tick;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + tick, tick);
            loop {
                ticker.tick().await;
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                countdown.send_replace(HoldCountdown::Held {
                    hold_id,
                    remaining_secs: ceil_secs(remaining),
                });
            }
        })
    }

    fn spawn_expiry(&self, hold_id: Uuid, deadline: Instant) -> JoinHandle<()> {
        let active = Arc::clone(&self.active);
        let store = Arc::clone(&self.store);
        let countdown = Arc::clone(&self.countdown);

        tokio::spawn(async move {
            sleep_until(deadline).await;

            let taken = {
                let mut guard = active.lock().await;
                match guard.as_ref() {
                    Some(current) if current.handle.hold_id == hold_id => guard.take(),
                    _ => None,
                }
            };
            let Some(hold) = taken else {
                return;
            };

            // Do not abort ourselves; only the ticker is still worth stopping.
            hold.ticker.abort();
            countdown.send_replace(HoldCountdown::Expired { hold_id });
            info!("Hold {} reached its deadline, releasing", hold_id);

            if let Err(e) = store.cancel(hold_id).await {
                warn!("Auto-release of hold {} failed, store expiry still applies: {}", hold_id, e);
            }
        })
    }
}

fn ceil_secs(remaining: Duration) -> u64 {
    remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
}

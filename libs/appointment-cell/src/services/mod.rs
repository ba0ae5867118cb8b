pub mod checkout;
pub mod hold;
pub mod memory_store;
pub mod store;

pub use checkout::{BookingCheckout, CheckoutLeg, CheckoutLegView};
pub use hold::SlotHoldCoordinator;
pub use memory_store::InMemorySlotClaimStore;
pub use store::{SlotClaimStore, SupabaseSlotClaimStore};

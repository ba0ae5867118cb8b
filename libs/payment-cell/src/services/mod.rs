pub mod card;
pub mod registry;
pub mod session;
pub mod split;
pub mod state_machine;
pub mod upi;

pub use card::CardReaderEvent;
pub use registry::PaymentSessionRegistry;
pub use session::{PaymentSession, PaymentTimeouts};
pub use split::{PaymentLeg, SplitAllocator, SplitRow};
pub use state_machine::{
    transition, Effect, PaymentEvent, PaymentSnapshot, PaymentState, PaymentStateMachine,
    TransitionContext,
};
pub use upi::{HttpUpiGateway, UpiGateway, UpiPollStatus, UpiQrRequest};

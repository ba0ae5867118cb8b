pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::{AllocationError, PaymentError, TransitionError, UpiGatewayError};
pub use models::*;
pub use router::{payment_routes, PaymentCellState};
pub use services::*;

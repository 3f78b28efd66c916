//! Orders: placement, payment and cancellation.

mod commands;
mod publisher;
mod service;

pub use commands::{OrderLine, PlaceOrder};
pub use publisher::{NoopPublisher, OrderPublisher};
pub use service::{CancelOutcome, OrderService};

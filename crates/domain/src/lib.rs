//! Order lifecycle for the checkout system.
//!
//! This crate provides:
//! - `OrderService`, which places orders while locking their stock, records
//!   payment and cancels unpaid orders
//! - `OrderPublisher`, the outbound port used to schedule the cancellation
//!   timer and to hand orders to the ingestion queue
//! - the `PlaceOrder` command and its validation

pub mod error;
pub mod order;

pub use error::{DomainError, PublishError, Result};
pub use order::{
    CancelOutcome, NoopPublisher, OrderLine, OrderPublisher, OrderService, PlaceOrder,
};
pub use store::{Order, OrderItem, OrderStatus, ShippingAddress};

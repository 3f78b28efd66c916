//! Checkout saga for the order system.
//!
//! The checkout turns a user's cart into a paid order in strict sequence:
//! 1. Read the cart and merge duplicate lines
//! 2. Price every line from the live catalog and check stock
//! 3. Place the order, locking its stock
//! 4. Charge the payment instrument
//! 5. Mark the order paid
//!
//! If anything fails after the order exists, the order is canceled, which
//! releases its stock, and the original error is returned.

pub mod error;
pub mod orchestrator;
pub mod services;

pub use error::{CheckoutError, Result};
pub use orchestrator::{
    CheckoutItem, CheckoutOrchestrator, CheckoutReceipt, CheckoutRequest, DEFAULT_CALL_TIMEOUT,
};
pub use services::{
    CardPaymentService, CartService, CatalogService, InMemoryPaymentService, OrderPlacement,
    PaymentReceipt, PaymentRequest, PaymentService, StoreCartService, StoreCatalogService,
};

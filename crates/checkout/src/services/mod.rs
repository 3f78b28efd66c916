//! Collaborators called by the checkout saga.

pub mod cart;
pub mod catalog;
pub mod orders;
pub mod payment;

pub use cart::{CartService, StoreCartService};
pub use catalog::{CatalogService, StoreCatalogService};
pub use orders::OrderPlacement;
pub use payment::{
    CardPaymentService, InMemoryPaymentService, PaymentReceipt, PaymentRequest, PaymentService,
};

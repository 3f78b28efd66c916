//! Persistence for the checkout system.
//!
//! Every mutation of shared state is a conditional update: it states the
//! condition the row must still satisfy and reports how many rows it touched.
//! Zero means the condition no longer held and nothing changed. The stock
//! ledger and the order status transitions are both built on this.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use model::{
    CartLine, Order, OrderItem, OrderStatus, ShippingAddress, Sku, StockLevel,
};
pub use postgres::PostgresStore;
pub use store::{Affected, CartStore, OrderRepository, SkuCatalog, StockLedger, StockLedgerExt};

use common::{OrderId, SkuId};
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The conditional deduction matched no row: either the SKU does not
    /// exist or its available stock is below the requested count.
    #[error("Insufficient stock for sku {sku_id}: requested {requested}")]
    StockInsufficient { sku_id: SkuId, requested: u32 },

    /// The conditional release matched no row: locked stock is below the
    /// requested count. Correct callers never trigger this.
    #[error("Locked stock for sku {sku_id} is below release count {requested}")]
    ReleaseInsufficient { sku_id: SkuId, requested: u32 },

    /// Stock counts must be positive.
    #[error("Invalid stock count {count} for sku {sku_id}")]
    InvalidCount { sku_id: SkuId, count: u32 },

    /// An order with this id has already been written.
    #[error("Order already exists: {0}")]
    DuplicateOrder(OrderId),

    /// A persisted row could not be mapped back into a model.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// The backing store refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

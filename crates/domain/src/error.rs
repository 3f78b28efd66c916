//! Domain error types.

use common::{OrderId, SkuId};
use store::{OrderStatus, StoreError};
use thiserror::Error;

/// Failure reported by an [`crate::OrderPublisher`].
#[derive(Debug, Error)]
#[error("Publish error: {0}")]
pub struct PublishError(pub String);

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The request is malformed; retrying will not help.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No order with this id exists.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// Not enough available stock to lock.
    #[error("Insufficient stock for sku {sku_id}: requested {requested}")]
    StockInsufficient { sku_id: SkuId, requested: u32 },

    /// The order's status does not allow the requested change.
    #[error("Invalid state transition: cannot {action} order {order_id} in {current} state")]
    InvalidTransition {
        order_id: OrderId,
        current: OrderStatus,
        action: &'static str,
    },

    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// A message could not be handed to the broker.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::StockInsufficient { sku_id, requested } => {
                DomainError::StockInsufficient { sku_id, requested }
            }
            StoreError::InvalidCount { sku_id, count } => {
                DomainError::Validation(format!("invalid quantity {count} for sku {sku_id}"))
            }
            other => DomainError::Store(other),
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;

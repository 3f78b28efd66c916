//! Checkout error types.

use common::SkuId;
use domain::DomainError;
use thiserror::Error;

/// Errors that can end a checkout.
///
/// Exactly one is reported per checkout. Failures while compensating are
/// logged and never replace the original error.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The user's cart has no lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// The request or cart contents are malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A SKU or order does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Not enough available stock for a line.
    #[error("Insufficient stock for sku {sku_id}: requested {requested}")]
    StockInsufficient { sku_id: SkuId, requested: u32 },

    /// A collaborator failed or did not answer in time.
    #[error("Remote call '{step}' failed: {reason}")]
    RemoteCall { step: &'static str, reason: String },

    /// The payment provider refused the charge.
    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// The order service refused an operation.
    #[error("Domain error: {0}")]
    Domain(DomainError),
}

impl CheckoutError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckoutError::EmptyCart => "empty_cart",
            CheckoutError::Validation(_) => "validation",
            CheckoutError::NotFound(_) => "not_found",
            CheckoutError::StockInsufficient { .. } => "stock_insufficient",
            CheckoutError::RemoteCall { .. } => "remote_call",
            CheckoutError::PaymentDeclined(_) => "payment_declined",
            CheckoutError::Domain(_) => "domain",
        }
    }
}

impl From<DomainError> for CheckoutError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(msg) => CheckoutError::Validation(msg),
            DomainError::NotFound(order_id) => {
                CheckoutError::NotFound(format!("order {order_id}"))
            }
            DomainError::StockInsufficient { sku_id, requested } => {
                CheckoutError::StockInsufficient { sku_id, requested }
            }
            other => CheckoutError::Domain(other),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;

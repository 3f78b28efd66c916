//! Broker error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No queue is bound to the exchange under this routing key.
    #[error("Unroutable message: exchange {exchange}, routing key {routing_key}")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },

    /// The queue is not declared in the topology.
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// The delivery is not held by this subscription.
    #[error("Unknown delivery tag: {0}")]
    UnknownDelivery(u64),

    /// The broker did not confirm a publish in time.
    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    /// Failed to encode or decode a message body.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

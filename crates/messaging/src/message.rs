//! Message payloads.

use chrono::Utc;
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};
use store::Order;

/// Reason recorded on timer-driven cancellations.
pub const TIMEOUT_REASON: &str = "timeout";

/// "Cancel this order if it is still unpaid."
///
/// Carries everything the consumer needs to find the order; the consumer
/// re-reads the order's status rather than trusting the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationTimerMessage {
    pub order_id: OrderId,
    pub user_id: UserId,
    /// Unix seconds at which the timer was started.
    pub created_at: i64,
    pub reason: String,
}

impl CancellationTimerMessage {
    pub fn for_order(order: &Order) -> Self {
        Self {
            order_id: order.order_id,
            user_id: order.user_id,
            created_at: Utc::now().timestamp(),
            reason: TIMEOUT_REASON.to_string(),
        }
    }

    /// Broker message id, one per order.
    pub fn message_id(&self) -> String {
        format!("{}_cancel", self.order_id)
    }
}

/// An accepted order waiting to be written, with its retry count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIngestionMessage {
    #[serde(flatten)]
    pub order: Order,
    #[serde(default)]
    pub retry: u32,
}

impl OrderIngestionMessage {
    pub fn new(order: Order) -> Self {
        Self { order, retry: 0 }
    }

    pub fn message_id(&self) -> String {
        self.order.order_id.to_string()
    }

    /// The same order with the retry count bumped.
    pub fn next_attempt(&self) -> Self {
        Self {
            order: self.order.clone(),
            retry: self.retry + 1,
        }
    }
}

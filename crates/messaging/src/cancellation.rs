//! Consumer for expired cancellation timers.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{DomainError, OrderPublisher, OrderService};
use store::{OrderRepository, StockLedger};

use crate::broker::Delivery;
use crate::message::CancellationTimerMessage;
use crate::worker::{Disposition, MessageHandler};

/// Cancels orders whose grace period ran out unpaid.
///
/// The order's current status decides: placed orders are canceled and
/// their stock released, anything else is left alone. Every decodable
/// message is acked, so a timer fires at most once per delivery and a
/// replay is harmless.
pub struct CancellationHandler<S, P> {
    orders: Arc<OrderService<S, P>>,
}

impl<S, P> CancellationHandler<S, P> {
    pub fn new(orders: Arc<OrderService<S, P>>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl<S, P> MessageHandler for CancellationHandler<S, P>
where
    S: StockLedger + OrderRepository + 'static,
    P: OrderPublisher + 'static,
{
    fn name(&self) -> &'static str {
        "cancellation"
    }

    #[tracing::instrument(skip(self, delivery), fields(message_id = %delivery.message_id))]
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let message: CancellationTimerMessage = match delivery.json() {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(error = %e, "Malformed cancellation message");
                metrics::counter!("cancel_timer_processed", "outcome" => "malformed").increment(1);
                return Disposition::Reject { requeue: false };
            }
        };

        let outcome = match self.orders.cancel(message.order_id).await {
            Ok(outcome) => {
                tracing::info!(
                    order_id = %message.order_id,
                    outcome = outcome.as_str(),
                    "Cancellation timer handled"
                );
                outcome.as_str()
            }
            Err(DomainError::NotFound(order_id)) => {
                tracing::warn!(%order_id, "Cancellation timer for unknown order");
                "not_found"
            }
            Err(e) => {
                tracing::error!(order_id = %message.order_id, error = %e, "Cancellation failed");
                "failed"
            }
        };

        metrics::counter!("cancel_timer_processed", "outcome" => outcome).increment(1);
        Disposition::Ack
    }
}

//! Consumer that persists accepted orders.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{OrderPublisher, OrderService};
use store::{OrderRepository, StockLedger};

use crate::broker::{Broker, BrokerExt, Delivery};
use crate::message::OrderIngestionMessage;
use crate::publisher::DEFAULT_PUBLISH_TIMEOUT;
use crate::topology::{ORDER_EXCHANGE, ORDER_RETRY_KEY};
use crate::worker::{Disposition, MessageHandler};

/// Retries allowed after the first failed write.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Writes orders taken from the order queue.
///
/// A failed write is republished with its retry count bumped, up to
/// `max_retries`. Retries go through the retry queue, which holds them back
/// for the topology's retry delay. After that the message is rejected into the dead-letter
/// queue and the stock the order locked is released. Orders that already
/// exist are acked without a second write.
pub struct IngestionHandler<S, P, B: ?Sized> {
    orders: Arc<OrderService<S, P>>,
    broker: Arc<B>,
    max_retries: u32,
    publish_timeout: Duration,
}

impl<S, P, B> IngestionHandler<S, P, B>
where
    S: StockLedger + OrderRepository,
    P: OrderPublisher,
    B: Broker + ?Sized,
{
    pub fn new(orders: Arc<OrderService<S, P>>, broker: Arc<B>) -> Self {
        Self {
            orders,
            broker,
            max_retries: DEFAULT_MAX_RETRIES,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    async fn dead_letter(&self, message: &OrderIngestionMessage) -> Disposition {
        self.orders.abandon_order(&message.order).await;
        metrics::counter!("ingestion_dead_lettered").increment(1);
        Disposition::Reject { requeue: false }
    }
}

#[async_trait]
impl<S, P, B> MessageHandler for IngestionHandler<S, P, B>
where
    S: StockLedger + OrderRepository + 'static,
    P: OrderPublisher + 'static,
    B: Broker + ?Sized + 'static,
{
    fn name(&self) -> &'static str {
        "ingestion"
    }

    #[tracing::instrument(skip(self, delivery), fields(message_id = %delivery.message_id))]
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let message: OrderIngestionMessage = match delivery.json() {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(error = %e, "Malformed order message");
                metrics::counter!("ingestion_dead_lettered").increment(1);
                return Disposition::Reject { requeue: false };
            }
        };
        let order_id = message.order.order_id;

        let error = match self.orders.persist_order(&message.order).await {
            Ok(true) => {
                metrics::counter!("ingestion_persisted").increment(1);
                tracing::info!(%order_id, retry = message.retry, "Order persisted");
                return Disposition::Ack;
            }
            Ok(false) => {
                tracing::info!(%order_id, "Order already persisted");
                return Disposition::Ack;
            }
            Err(e) => e,
        };

        if message.retry >= self.max_retries {
            tracing::error!(
                %order_id,
                retry = message.retry,
                error = %error,
                "Order write failed, retries exhausted"
            );
            return self.dead_letter(&message).await;
        }

        let next = message.next_attempt();
        tracing::warn!(%order_id, retry = next.retry, error = %error, "Order write failed, retrying");

        match self
            .broker
            .publish_json(
                ORDER_EXCHANGE,
                ORDER_RETRY_KEY,
                next.message_id(),
                &next,
                self.publish_timeout,
            )
            .await
        {
            Ok(()) => {
                metrics::counter!("ingestion_retried").increment(1);
                Disposition::Ack
            }
            Err(e) => {
                tracing::error!(%order_id, error = %e, "Failed to republish order");
                self.dead_letter(&message).await
            }
        }
    }
}

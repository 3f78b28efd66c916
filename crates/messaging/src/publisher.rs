//! Broker-backed [`OrderPublisher`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{OrderPublisher, PublishError};
use store::Order;

use crate::broker::{Broker, BrokerExt};
use crate::message::{CancellationTimerMessage, OrderIngestionMessage};
use crate::topology::{DELAY_EXCHANGE, DELAY_KEY, ORDER_CREATE_KEY, ORDER_EXCHANGE};

/// How long a publish may wait for the broker.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes cancellation timers to the delay exchange and accepted orders
/// to the order exchange.
pub struct BrokerOrderPublisher<B: ?Sized> {
    broker: Arc<B>,
    timeout: Duration,
}

impl<B: Broker + ?Sized> BrokerOrderPublisher<B> {
    pub fn new(broker: Arc<B>) -> Self {
        Self {
            broker,
            timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl<B: Broker + ?Sized> OrderPublisher for BrokerOrderPublisher<B> {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.order_id))]
    async fn schedule_cancellation(&self, order: &Order) -> Result<(), PublishError> {
        let message = CancellationTimerMessage::for_order(order);
        self.broker
            .publish_json(
                DELAY_EXCHANGE,
                DELAY_KEY,
                message.message_id(),
                &message,
                self.timeout,
            )
            .await
            .map_err(|e| PublishError(e.to_string()))?;

        tracing::debug!("Cancellation timer scheduled");
        Ok(())
    }

    #[tracing::instrument(skip(self, order), fields(order_id = %order.order_id))]
    async fn enqueue_ingestion(&self, order: &Order) -> Result<(), PublishError> {
        let message = OrderIngestionMessage::new(order.clone());
        self.broker
            .publish_json(
                ORDER_EXCHANGE,
                ORDER_CREATE_KEY,
                message.message_id(),
                &message,
                self.timeout,
            )
            .await
            .map_err(|e| PublishError(e.to_string()))
    }
}

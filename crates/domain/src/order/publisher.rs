use std::sync::Arc;

use async_trait::async_trait;
use store::Order;

use crate::error::PublishError;

/// Outbound messages emitted while placing orders.
#[async_trait]
pub trait OrderPublisher: Send + Sync {
    /// Starts the grace-period timer after which an unpaid order is canceled.
    async fn schedule_cancellation(&self, order: &Order) -> Result<(), PublishError>;

    /// Hands a fully built order to the ingestion queue for persistence.
    async fn enqueue_ingestion(&self, order: &Order) -> Result<(), PublishError>;
}

#[async_trait]
impl<P: OrderPublisher + ?Sized> OrderPublisher for Arc<P> {
    async fn schedule_cancellation(&self, order: &Order) -> Result<(), PublishError> {
        (**self).schedule_cancellation(order).await
    }

    async fn enqueue_ingestion(&self, order: &Order) -> Result<(), PublishError> {
        (**self).enqueue_ingestion(order).await
    }
}

/// Publisher that drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl OrderPublisher for NoopPublisher {
    async fn schedule_cancellation(&self, _order: &Order) -> Result<(), PublishError> {
        Ok(())
    }

    async fn enqueue_ingestion(&self, _order: &Order) -> Result<(), PublishError> {
        Ok(())
    }
}

//! Order operations used by the checkout.

use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use domain::{CancelOutcome, Order, OrderPublisher, OrderService, PlaceOrder};
use store::{OrderRepository, StockLedger};

/// The order service as seen by the checkout.
#[async_trait]
pub trait OrderPlacement: Send + Sync {
    async fn place_order(&self, cmd: PlaceOrder) -> domain::Result<Order>;

    async fn accept_order(&self, cmd: PlaceOrder) -> domain::Result<Order>;

    async fn mark_paid(&self, order_id: OrderId) -> domain::Result<()>;

    async fn cancel(&self, order_id: OrderId) -> domain::Result<CancelOutcome>;
}

#[async_trait]
impl<S, P> OrderPlacement for OrderService<S, P>
where
    S: StockLedger + OrderRepository,
    P: OrderPublisher,
{
    async fn place_order(&self, cmd: PlaceOrder) -> domain::Result<Order> {
        OrderService::place_order(self, cmd).await
    }

    async fn accept_order(&self, cmd: PlaceOrder) -> domain::Result<Order> {
        OrderService::accept_order(self, cmd).await
    }

    async fn mark_paid(&self, order_id: OrderId) -> domain::Result<()> {
        OrderService::mark_paid(self, order_id).await
    }

    async fn cancel(&self, order_id: OrderId) -> domain::Result<CancelOutcome> {
        OrderService::cancel(self, order_id).await
    }
}

#[async_trait]
impl<O: OrderPlacement + ?Sized> OrderPlacement for Arc<O> {
    async fn place_order(&self, cmd: PlaceOrder) -> domain::Result<Order> {
        (**self).place_order(cmd).await
    }

    async fn accept_order(&self, cmd: PlaceOrder) -> domain::Result<Order> {
        (**self).accept_order(cmd).await
    }

    async fn mark_paid(&self, order_id: OrderId) -> domain::Result<()> {
        (**self).mark_paid(order_id).await
    }

    async fn cancel(&self, order_id: OrderId) -> domain::Result<CancelOutcome> {
        (**self).cancel(order_id).await
    }
}

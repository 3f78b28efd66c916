//! Order service: the only writer of order status and order-driven stock
//! movements.

use std::sync::Arc;

use chrono::Utc;
use common::{OrderId, Snowflake, UserId};
use store::{
    Order, OrderItem, OrderRepository, OrderStatus, StockLedger, StockLedgerExt, StoreError,
};

use crate::error::{DomainError, Result};

use super::{OrderPublisher, PlaceOrder};

/// What a cancel call found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The order was placed; it is now canceled and its stock released.
    Canceled,

    /// The order was already canceled. Nothing changed.
    AlreadyCanceled,

    /// The order was already paid. Nothing changed.
    AlreadyPaid,
}

impl CancelOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelOutcome::Canceled => "canceled",
            CancelOutcome::AlreadyCanceled => "already_canceled",
            CancelOutcome::AlreadyPaid => "already_paid",
        }
    }
}

/// Service for managing orders.
///
/// Stock is locked when an order is placed and released only when it is
/// canceled. Status changes go through guarded transitions out of
/// `placed`, so a concurrent pay and cancel settle on whichever lands first.
pub struct OrderService<S, P> {
    store: S,
    publisher: P,
    ids: Arc<Snowflake>,
}

impl<S, P> OrderService<S, P>
where
    S: StockLedger + OrderRepository,
    P: OrderPublisher,
{
    /// Creates a new order service.
    pub fn new(store: S, publisher: P, ids: Arc<Snowflake>) -> Self {
        Self {
            store,
            publisher,
            ids,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Places an order synchronously.
    ///
    /// Locks stock for every line, writes the order with its items in one
    /// transaction and starts the cancellation timer. If any line cannot be
    /// locked, or the write fails, every unit locked so far is released.
    #[tracing::instrument(skip(self, cmd), fields(user_id = %cmd.user_id))]
    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<Order> {
        cmd.validate()?;
        let order = self.build_order(cmd);

        self.lock_stock(&order.items).await?;

        if let Err(e) = self.store.insert_order(&order).await {
            tracing::error!(order_id = %order.order_id, error = %e, "Failed to write order, releasing stock");
            self.release_stock(&order.items).await;
            return Err(e.into());
        }

        self.schedule_cancellation(&order).await;

        metrics::counter!("orders_placed_total").increment(1);
        tracing::info!(order_id = %order.order_id, total = %order.total, "Order placed");
        Ok(order)
    }

    /// Accepts an order for asynchronous persistence.
    ///
    /// Stock is locked immediately and the order is queued for an ingestion
    /// worker to write. The returned order id is final. The cancellation
    /// timer starts once the order is written, in [`Self::persist_order`].
    #[tracing::instrument(skip(self, cmd), fields(user_id = %cmd.user_id))]
    pub async fn accept_order(&self, cmd: PlaceOrder) -> Result<Order> {
        cmd.validate()?;
        let order = self.build_order(cmd);

        self.lock_stock(&order.items).await?;

        if let Err(e) = self.publisher.enqueue_ingestion(&order).await {
            tracing::error!(order_id = %order.order_id, error = %e, "Failed to enqueue order, releasing stock");
            self.release_stock(&order.items).await;
            return Err(e.into());
        }

        metrics::counter!("orders_accepted_total").increment(1);
        tracing::info!(order_id = %order.order_id, "Order accepted for ingestion");
        Ok(order)
    }

    /// Writes an order taken from the ingestion queue.
    ///
    /// Starts the cancellation timer after a successful write, so the
    /// grace period never runs out before the order can be found. Returns
    /// false if the order already exists, which makes redelivered messages
    /// harmless.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.order_id))]
    pub async fn persist_order(&self, order: &Order) -> Result<bool> {
        if self.store.order_exists(order.order_id).await? {
            tracing::info!("Order already exists, skipping");
            return Ok(false);
        }

        match self.store.insert_order(order).await {
            Ok(()) => {
                self.schedule_cancellation(order).await;
                Ok(true)
            }
            Err(StoreError::DuplicateOrder(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the stock locked by an accepted order that will never be
    /// written.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.order_id))]
    pub async fn abandon_order(&self, order: &Order) {
        self.release_stock(&order.items).await;
        tracing::warn!("Abandoned unpersisted order, stock released");
    }

    /// Records payment for a placed order.
    ///
    /// Paying an already paid order succeeds again. A canceled order is
    /// never overwritten.
    #[tracing::instrument(skip(self))]
    pub async fn mark_paid(&self, order_id: OrderId) -> Result<()> {
        loop {
            let affected = self
                .store
                .transition_status(order_id, OrderStatus::Placed, OrderStatus::Paid)
                .await?;
            if !affected.is_none() {
                metrics::counter!("orders_paid_total").increment(1);
                tracing::info!("Order paid");
                return Ok(());
            }

            match self.store.order_status(order_id).await? {
                None => return Err(DomainError::NotFound(order_id)),
                Some(OrderStatus::Paid) => return Ok(()),
                Some(current @ OrderStatus::Canceled) => {
                    return Err(DomainError::InvalidTransition {
                        order_id,
                        current,
                        action: "mark paid",
                    });
                }
                // status changed between the two statements; try again
                Some(OrderStatus::Placed) => continue,
            }
        }
    }

    /// Cancels a placed order and releases its stock.
    ///
    /// Paid and canceled orders are left untouched. The status change
    /// happens first; only the caller that wins it releases stock, so a
    /// repeated or racing cancel never releases twice. A failed release is
    /// logged and does not fail the call.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: OrderId) -> Result<CancelOutcome> {
        loop {
            let order = self
                .store
                .find_order(order_id)
                .await?
                .ok_or(DomainError::NotFound(order_id))?;

            match order.status {
                OrderStatus::Paid => return Ok(CancelOutcome::AlreadyPaid),
                OrderStatus::Canceled => return Ok(CancelOutcome::AlreadyCanceled),
                OrderStatus::Placed => {}
            }

            let affected = self
                .store
                .transition_status(order_id, OrderStatus::Placed, OrderStatus::Canceled)
                .await?;
            if affected.is_none() {
                continue;
            }

            self.release_stock(&order.items).await;

            metrics::counter!("orders_canceled_total").increment(1);
            tracing::info!("Order canceled");
            return Ok(CancelOutcome::Canceled);
        }
    }

    /// Loads an order with its items.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .find_order(order_id)
            .await?
            .ok_or(DomainError::NotFound(order_id))
    }

    /// Lists a user's orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        if user_id.is_zero() {
            return Err(DomainError::Validation("user_id is required".to_string()));
        }
        Ok(self.store.list_orders_for_user(user_id).await?)
    }

    fn build_order(&self, cmd: PlaceOrder) -> Order {
        let order_id = OrderId::new(self.ids.generate());
        let items: Vec<OrderItem> = cmd
            .lines
            .into_iter()
            .map(|line| OrderItem {
                order_id,
                sku_id: line.sku_id,
                name: line.name,
                price: line.price,
                quantity: line.quantity,
            })
            .collect();

        Order {
            order_id,
            user_id: cmd.user_id,
            email: cmd.email,
            shipping_address: cmd.shipping_address,
            status: OrderStatus::Placed,
            total: Order::total_of(&items),
            created_at: Utc::now(),
            items,
        }
    }

    async fn lock_stock(&self, items: &[OrderItem]) -> Result<()> {
        for (locked, item) in items.iter().enumerate() {
            if let Err(e) = self.store.deduct(item.sku_id, item.quantity).await {
                tracing::info!(sku_id = %item.sku_id, quantity = item.quantity, error = %e, "Stock lock failed");
                self.release_stock(&items[..locked]).await;
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn release_stock(&self, items: &[OrderItem]) {
        for item in items {
            if let Err(e) = self.store.release(item.sku_id, item.quantity).await {
                metrics::counter!("stock_release_failed").increment(1);
                tracing::error!(
                    sku_id = %item.sku_id,
                    quantity = item.quantity,
                    error = %e,
                    "Failed to release stock"
                );
            }
        }
    }

    async fn schedule_cancellation(&self, order: &Order) {
        if let Err(e) = self.publisher.schedule_cancellation(order).await {
            metrics::counter!("cancel_timer_publish_failed").increment(1);
            tracing::warn!(order_id = %order.order_id, error = %e, "Failed to schedule cancellation timer");
        }
    }
}

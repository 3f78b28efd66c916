//! Checkout orchestrator.

use std::future::Future;
use std::time::{Duration, Instant};

use common::{Money, OrderId, SkuId, UserId};
use domain::{Order, OrderLine, PlaceOrder, ShippingAddress};
use serde::{Deserialize, Serialize};
use store::CartLine;
use tokio::task::JoinError;

use crate::error::{CheckoutError, Result};
use crate::services::{
    CartService, CatalogService, OrderPlacement, PaymentRequest, PaymentService,
};

/// Bound on every collaborator call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to check out a user's cart.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub email: String,
    pub shipping_address: ShippingAddress,
    /// Card number to charge.
    pub instrument: String,
}

/// A priced line on a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub sku_id: SkuId,
    pub name: String,
    pub price: Money,
    pub quantity: u32,
}

/// Result of a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub order_id: OrderId,
    pub total: Money,
    pub trade_no: String,
    pub items: Vec<CheckoutItem>,
}

/// Drives the checkout saga across the cart, catalog, order and payment
/// services.
///
/// Steps run one after another and each call is bounded by a timeout. Once
/// an order exists, any failure cancels it before the error is returned.
///
/// Order operations run on their own tasks. A timeout stops the saga from
/// waiting on them but never interrupts them, so stock is never left locked
/// by a half-finished placement or cancellation.
pub struct CheckoutOrchestrator<C, K, O, P>
where
    C: CartService,
    K: CatalogService,
    O: OrderPlacement,
    P: PaymentService,
{
    cart: C,
    catalog: K,
    orders: O,
    payment: P,
    call_timeout: Duration,
}

impl<C, K, O, P> CheckoutOrchestrator<C, K, O, P>
where
    C: CartService,
    K: CatalogService,
    O: OrderPlacement + Clone + 'static,
    P: PaymentService,
{
    /// Creates a new checkout orchestrator.
    pub fn new(cart: C, catalog: K, orders: O, payment: P) -> Self {
        Self {
            cart,
            catalog,
            orders,
            payment,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Checks out the user's cart and charges the instrument.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        metrics::counter!("checkout_total").increment(1);
        let started = Instant::now();

        let result = self.run_checkout(request).await;

        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        match &result {
            Ok(receipt) => {
                tracing::info!(order_id = %receipt.order_id, total = %receipt.total, "Checkout completed");
            }
            Err(e) => {
                metrics::counter!("checkout_failed", "reason" => e.kind()).increment(1);
                tracing::warn!(error = %e, "Checkout failed");
            }
        }
        result
    }

    /// Turns the user's cart into an order without charging it.
    ///
    /// The order is accepted for asynchronous persistence and will be
    /// canceled by its timer unless paid within the grace period.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn submit_order(&self, request: CheckoutRequest) -> Result<Order> {
        let cmd = self.prepare(&request).await?;
        let orders = self.orders.clone();
        let order = self
            .detached("accept_order", async move { orders.accept_order(cmd).await })
            .await?;

        tracing::info!(order_id = %order.order_id, "Order submitted");
        Ok(order)
    }

    async fn run_checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        let cmd = self.prepare(&request).await?;

        let order = self.place(cmd).await?;
        let order_id = order.order_id;
        tracing::info!(step = "place_order", %order_id, "Saga step completed");

        let payment = PaymentRequest {
            order_id,
            user_id: request.user_id,
            amount: order.total,
            instrument: request.instrument,
        };
        let receipt = match self.call("pay", self.payment.pay(&payment)).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.compensate(order_id, "pay").await;
                return Err(e);
            }
        };
        tracing::info!(step = "pay", %order_id, trade_no = %receipt.trade_no, "Saga step completed");

        let orders = self.orders.clone();
        if let Err(e) = self
            .detached("mark_paid", async move { orders.mark_paid(order_id).await })
            .await
        {
            tracing::error!(
                %order_id,
                trade_no = %receipt.trade_no,
                amount = %order.total,
                error = %e,
                "Order charged but not marked paid; charge needs manual reconciliation"
            );
            self.compensate(order_id, "mark_paid").await;
            return Err(e);
        }

        Ok(CheckoutReceipt {
            order_id,
            total: order.total,
            trade_no: receipt.trade_no,
            items: order
                .items
                .into_iter()
                .map(|item| CheckoutItem {
                    sku_id: item.sku_id,
                    name: item.name,
                    price: item.price,
                    quantity: item.quantity,
                })
                .collect(),
        })
    }

    /// Reads, normalizes and prices the cart, checking stock before any
    /// side effect.
    async fn prepare(&self, request: &CheckoutRequest) -> Result<PlaceOrder> {
        if request.user_id.is_zero() {
            return Err(CheckoutError::Validation("user_id is required".to_string()));
        }

        let cart = self.call("get_cart", self.cart.get_cart(request.user_id)).await?;
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        let lines = normalize(&cart)?;

        let sku_ids: Vec<SkuId> = lines.iter().map(|(sku_id, _)| *sku_id).collect();
        let skus = self
            .call("get_skus", self.catalog.get_skus_by_ids(&sku_ids))
            .await?;

        let mut order_lines = Vec::with_capacity(lines.len());
        for (sku_id, quantity) in lines {
            let sku = skus
                .get(&sku_id)
                .ok_or_else(|| CheckoutError::NotFound(format!("sku {sku_id}")))?;
            if sku.available_stock < i64::from(quantity) {
                return Err(CheckoutError::StockInsufficient {
                    sku_id,
                    requested: quantity,
                });
            }
            order_lines.push(OrderLine::new(sku_id, sku.name.clone(), sku.price, quantity));
        }

        Ok(PlaceOrder::new(
            request.user_id,
            request.email.clone(),
            request.shipping_address.clone(),
            order_lines,
        ))
    }

    /// Cancels the order created by a failed checkout. Failures are logged
    /// and left to the cancellation timer.
    async fn compensate(&self, order_id: OrderId, failed_step: &'static str) {
        tracing::warn!(%order_id, step = failed_step, "Compensating: canceling order");

        let orders = self.orders.clone();
        match self
            .detached("cancel_order", async move { orders.cancel(order_id).await })
            .await
        {
            Ok(outcome) => {
                tracing::info!(%order_id, outcome = outcome.as_str(), "Compensation completed");
            }
            Err(e) => {
                metrics::counter!("checkout_compensation_failed").increment(1);
                tracing::error!(%order_id, error = %e, "Compensation failed");
            }
        }
    }

    /// Places the order on its own task. If the placement outlives the
    /// call timeout it still runs to completion, and the order it creates
    /// is canceled right away.
    async fn place(&self, cmd: PlaceOrder) -> Result<Order> {
        let orders = self.orders.clone();
        let mut placing = tokio::spawn(async move { orders.place_order(cmd).await });

        match tokio::time::timeout(self.call_timeout, &mut placing).await {
            Ok(joined) => settle("place_order", joined),
            Err(_) => {
                let orders = self.orders.clone();
                tokio::spawn(async move {
                    let Ok(Ok(order)) = placing.await else {
                        return;
                    };
                    let order_id = order.order_id;
                    tracing::warn!(%order_id, "Order placed after checkout timed out, canceling");
                    if let Err(e) = orders.cancel(order_id).await {
                        metrics::counter!("checkout_compensation_failed").increment(1);
                        tracing::error!(%order_id, error = %e, "Late compensation failed");
                    }
                });
                Err(self.timed_out("place_order"))
            }
        }
    }

    /// Runs an order operation on its own task and waits for it up to the
    /// call timeout. On timeout the task keeps running.
    async fn detached<T, F>(&self, step: &'static str, fut: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = domain::Result<T>> + Send + 'static,
    {
        match tokio::time::timeout(self.call_timeout, tokio::spawn(fut)).await {
            Ok(joined) => settle(step, joined),
            Err(_) => Err(self.timed_out(step)),
        }
    }

    async fn call<T>(
        &self,
        step: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .unwrap_or_else(|_| Err(self.timed_out(step)))
    }

    fn timed_out(&self, step: &'static str) -> CheckoutError {
        CheckoutError::RemoteCall {
            step,
            reason: format!("timed out after {:?}", self.call_timeout),
        }
    }
}

fn settle<T>(
    step: &'static str,
    joined: std::result::Result<domain::Result<T>, JoinError>,
) -> Result<T> {
    match joined {
        Ok(result) => result.map_err(CheckoutError::from),
        Err(e) => Err(CheckoutError::RemoteCall {
            step,
            reason: format!("task failed: {e}"),
        }),
    }
}

/// Merges duplicate SKU lines, keeping the order in which each SKU first
/// appears.
fn normalize(cart: &[CartLine]) -> Result<Vec<(SkuId, u32)>> {
    let mut merged: Vec<(SkuId, i64)> = Vec::with_capacity(cart.len());
    for line in cart {
        if line.sku_id.is_zero() || line.quantity <= 0 {
            return Err(CheckoutError::Validation(format!(
                "invalid sku_id {} or quantity {}",
                line.sku_id, line.quantity
            )));
        }
        match merged.iter_mut().find(|(sku_id, _)| *sku_id == line.sku_id) {
            Some((_, quantity)) => *quantity += line.quantity,
            None => merged.push((line.sku_id, line.quantity)),
        }
    }

    merged
        .into_iter()
        .map(|(sku_id, quantity)| {
            u32::try_from(quantity)
                .map(|quantity| (sku_id, quantity))
                .map_err(|_| {
                    CheckoutError::Validation(format!("quantity {quantity} for sku {sku_id} is too large"))
                })
        })
        .collect()
}

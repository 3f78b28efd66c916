use std::collections::HashMap;

use async_trait::async_trait;
use common::{OrderId, SkuId, UserId};

use crate::{CartLine, Order, OrderStatus, Result, Sku, StockLevel, StoreError};

/// Number of rows a conditional update touched.
///
/// Zero means the guard no longer held and nothing was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Affected(pub u64);

impl Affected {
    pub const NONE: Affected = Affected(0);
    pub const ONE: Affected = Affected(1);

    pub fn rows(&self) -> u64 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

/// Per-SKU stock counters.
///
/// Implementations expose the raw conditional updates; [`StockLedgerExt`]
/// turns their affected-row counts into domain outcomes.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// `available -= count, locked += count, version += 1` where
    /// `available >= count`.
    async fn deduct_if_available(&self, sku_id: SkuId, count: u32) -> Result<Affected>;

    /// `locked -= count, available += count, version += 1` where
    /// `locked >= count`.
    async fn release_if_locked(&self, sku_id: SkuId, count: u32) -> Result<Affected>;

    /// Adds `delta` to the popularity counter, never going below zero.
    async fn adjust_sale_count(&self, sku_id: SkuId, delta: i64) -> Result<()>;

    /// Current counters, or None for an unknown SKU.
    async fn stock(&self, sku_id: SkuId) -> Result<Option<StockLevel>>;
}

/// Deduct and release with validation, outcome mapping and the
/// best-effort sale counter.
#[async_trait]
pub trait StockLedgerExt: StockLedger {
    /// Locks `count` units of `sku_id`.
    ///
    /// Fails with `StockInsufficient` when the guarded update matches no
    /// row, which covers both a short SKU and an unknown one.
    async fn deduct(&self, sku_id: SkuId, count: u32) -> Result<()> {
        if count == 0 {
            return Err(StoreError::InvalidCount { sku_id, count });
        }

        if self.deduct_if_available(sku_id, count).await?.is_none() {
            metrics::counter!("stock_deduct_rejected").increment(1);
            return Err(StoreError::StockInsufficient {
                sku_id,
                requested: count,
            });
        }

        if let Err(e) = self.adjust_sale_count(sku_id, i64::from(count)).await {
            tracing::warn!(%sku_id, error = %e, "Failed to increment sale count");
        }
        Ok(())
    }

    /// Returns `count` locked units of `sku_id` to available stock.
    async fn release(&self, sku_id: SkuId, count: u32) -> Result<()> {
        if count == 0 {
            return Err(StoreError::InvalidCount { sku_id, count });
        }

        if self.release_if_locked(sku_id, count).await?.is_none() {
            return Err(StoreError::ReleaseInsufficient {
                sku_id,
                requested: count,
            });
        }

        if let Err(e) = self.adjust_sale_count(sku_id, -i64::from(count)).await {
            tracing::warn!(%sku_id, error = %e, "Failed to decrement sale count");
        }
        Ok(())
    }
}

// Blanket implementation for all StockLedger implementations
impl<T: StockLedger + ?Sized> StockLedgerExt for T {}

/// Catalog lookups for the SKUs a checkout touches.
#[async_trait]
pub trait SkuCatalog: Send + Sync {
    /// Fetches every known SKU among `sku_ids`. Unknown ids are absent
    /// from the map.
    async fn get_skus_by_ids(&self, sku_ids: &[SkuId]) -> Result<HashMap<SkuId, Sku>>;

    /// Inserts or replaces a catalog row, counters included.
    async fn upsert_sku(&self, sku: &Sku) -> Result<()>;
}

/// Durable orders and their items.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Writes the order and all of its items atomically.
    ///
    /// Fails with `DuplicateOrder` if the id is already taken.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn order_exists(&self, order_id: OrderId) -> Result<bool>;

    /// Loads an order with its items in line order.
    async fn find_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    async fn order_status(&self, order_id: OrderId) -> Result<Option<OrderStatus>>;

    /// Orders of a user, newest first.
    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Sets `status = to` where `status = from`.
    async fn transition_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Affected>;
}

/// Read access to stored carts.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Lines of the user's cart in the order they were added.
    async fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>>;
}

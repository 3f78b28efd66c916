use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{OrderId, SkuId, UserId};
use tokio::sync::RwLock;

use crate::{
    CartLine, Order, OrderStatus, Result, Sku, StockLevel, StoreError,
    store::{Affected, CartStore, OrderRepository, SkuCatalog, StockLedger},
};

#[derive(Default)]
struct Faults {
    fail_on_insert: AtomicBool,
    fail_on_release: AtomicBool,
    fail_on_sale_count: AtomicBool,
}

/// In-memory store implementation for testing.
///
/// Every conditional update checks its guard and writes under one write
/// lock on the table, which gives the same all-or-nothing outcome as the
/// guarded `UPDATE` statements of the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    skus: Arc<RwLock<HashMap<SkuId, Sku>>>,
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    carts: Arc<RwLock<HashMap<UserId, Vec<CartLine>>>>,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a catalog row.
    pub async fn put_sku(&self, sku: Sku) {
        self.skus.write().await.insert(sku.sku_id, sku);
    }

    /// Appends a line to a user's cart.
    pub async fn add_to_cart(&self, user_id: UserId, sku_id: SkuId, quantity: i64) {
        self.carts
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(CartLine { sku_id, quantity });
    }

    /// Returns the number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Makes `insert_order` fail.
    pub fn set_fail_on_insert(&self, fail: bool) {
        self.faults.fail_on_insert.store(fail, Ordering::SeqCst);
    }

    /// Makes `release_if_locked` fail.
    pub fn set_fail_on_release(&self, fail: bool) {
        self.faults.fail_on_release.store(fail, Ordering::SeqCst);
    }

    /// Makes `adjust_sale_count` fail.
    pub fn set_fail_on_sale_count(&self, fail: bool) {
        self.faults.fail_on_sale_count.store(fail, Ordering::SeqCst);
    }

    /// Current `sale_count` of a SKU.
    pub async fn sale_count(&self, sku_id: SkuId) -> Option<i64> {
        self.skus.read().await.get(&sku_id).map(|s| s.sale_count)
    }

    /// Applies `update` to the SKU if `guard` holds, under one write lock.
    async fn update_sku_if(
        &self,
        sku_id: SkuId,
        guard: impl FnOnce(&Sku) -> bool + Send,
        update: impl FnOnce(&mut Sku) + Send,
    ) -> Affected {
        let mut skus = self.skus.write().await;
        match skus.get_mut(&sku_id) {
            Some(sku) if guard(sku) => {
                update(sku);
                Affected::ONE
            }
            _ => Affected::NONE,
        }
    }
}

#[async_trait]
impl StockLedger for InMemoryStore {
    async fn deduct_if_available(&self, sku_id: SkuId, count: u32) -> Result<Affected> {
        let count = i64::from(count);
        Ok(self
            .update_sku_if(
                sku_id,
                |sku| sku.available_stock >= count,
                |sku| {
                    sku.available_stock -= count;
                    sku.locked_stock += count;
                    sku.version += 1;
                },
            )
            .await)
    }

    async fn release_if_locked(&self, sku_id: SkuId, count: u32) -> Result<Affected> {
        if self.faults.fail_on_release.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("release rejected".to_string()));
        }

        let count = i64::from(count);
        Ok(self
            .update_sku_if(
                sku_id,
                |sku| sku.locked_stock >= count,
                |sku| {
                    sku.locked_stock -= count;
                    sku.available_stock += count;
                    sku.version += 1;
                },
            )
            .await)
    }

    async fn adjust_sale_count(&self, sku_id: SkuId, delta: i64) -> Result<()> {
        if self.faults.fail_on_sale_count.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("sale count rejected".to_string()));
        }

        self.update_sku_if(
            sku_id,
            |_| true,
            |sku| sku.sale_count = (sku.sale_count + delta).max(0),
        )
        .await;
        Ok(())
    }

    async fn stock(&self, sku_id: SkuId) -> Result<Option<StockLevel>> {
        Ok(self.skus.read().await.get(&sku_id).map(Sku::stock_level))
    }
}

#[async_trait]
impl SkuCatalog for InMemoryStore {
    async fn get_skus_by_ids(&self, sku_ids: &[SkuId]) -> Result<HashMap<SkuId, Sku>> {
        let skus = self.skus.read().await;
        Ok(sku_ids
            .iter()
            .filter_map(|id| skus.get(id).map(|sku| (*id, sku.clone())))
            .collect())
    }

    async fn upsert_sku(&self, sku: &Sku) -> Result<()> {
        self.skus.write().await.insert(sku.sku_id, sku.clone());
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        if self.faults.fail_on_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("insert rejected".to_string()));
        }

        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.order_id) {
            return Err(StoreError::DuplicateOrder(order.order_id));
        }
        orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn order_exists(&self, order_id: OrderId) -> Result<bool> {
        Ok(self.orders.read().await.contains_key(&order_id))
    }

    async fn find_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn order_status(&self, order_id: OrderId) -> Result<Option<OrderStatus>> {
        Ok(self.orders.read().await.get(&order_id).map(|o| o.status))
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut found: Vec<_> = orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.order_id.cmp(&a.order_id))
        });
        Ok(found)
    }

    async fn transition_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Affected> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&order_id) {
            Some(order) if order.status == from => {
                order.status = to;
                Ok(Affected::ONE)
            }
            _ => Ok(Affected::NONE),
        }
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        Ok(self
            .carts
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use common::Money;

    use super::*;
    use crate::{OrderItem, ShippingAddress, store::StockLedgerExt};

    const SKU: SkuId = SkuId::new(100);

    async fn store_with_stock(stock: i64) -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .put_sku(Sku::new(SKU, "widget", Money::from_cents(1999), stock))
            .await;
        store
    }

    fn order(id: u64, user: u64) -> Order {
        let order_id = OrderId::new(id);
        Order {
            order_id,
            user_id: UserId::new(user),
            email: "buyer@example.com".to_string(),
            shipping_address: ShippingAddress {
                name: "Ada".to_string(),
                street_address: "1 Main St".to_string(),
                city: "Springfield".to_string(),
                zip_code: "12345".to_string(),
            },
            status: OrderStatus::Placed,
            total: Money::from_cents(3998),
            created_at: Utc::now(),
            items: vec![OrderItem {
                order_id,
                sku_id: SKU,
                name: "widget".to_string(),
                price: Money::from_cents(1999),
                quantity: 2,
            }],
        }
    }

    #[tokio::test]
    async fn deduct_moves_available_to_locked() {
        let store = store_with_stock(5).await;

        store.deduct(SKU, 2).await.unwrap();

        let level = store.stock(SKU).await.unwrap().unwrap();
        assert_eq!(level.available, 3);
        assert_eq!(level.locked, 2);
        assert_eq!(level.version, 2);
        assert_eq!(store.sale_count(SKU).await, Some(2));
    }

    #[tokio::test]
    async fn deduct_beyond_available_changes_nothing() {
        let store = store_with_stock(1).await;

        let result = store.deduct(SKU, 2).await;
        assert!(matches!(
            result,
            Err(StoreError::StockInsufficient { requested: 2, .. })
        ));

        let level = store.stock(SKU).await.unwrap().unwrap();
        assert_eq!(level.available, 1);
        assert_eq!(level.locked, 0);
        assert_eq!(level.version, 1);
    }

    #[tokio::test]
    async fn deduct_unknown_sku_is_insufficient() {
        let store = InMemoryStore::new();
        let result = store.deduct(SkuId::new(9), 1).await;
        assert!(matches!(result, Err(StoreError::StockInsufficient { .. })));
    }

    #[tokio::test]
    async fn zero_count_is_rejected() {
        let store = store_with_stock(5).await;
        assert!(matches!(
            store.deduct(SKU, 0).await,
            Err(StoreError::InvalidCount { .. })
        ));
        assert!(matches!(
            store.release(SKU, 0).await,
            Err(StoreError::InvalidCount { .. })
        ));
    }

    #[tokio::test]
    async fn release_conserves_total() {
        let store = store_with_stock(5).await;
        let before = store.stock(SKU).await.unwrap().unwrap();

        store.deduct(SKU, 3).await.unwrap();
        store.release(SKU, 3).await.unwrap();

        let after = store.stock(SKU).await.unwrap().unwrap();
        assert_eq!(after.available, 5);
        assert_eq!(after.locked, 0);
        assert_eq!(after.total(), before.total());
        assert_eq!(after.version, before.version + 2);
        assert_eq!(store.sale_count(SKU).await, Some(0));
    }

    #[tokio::test]
    async fn release_more_than_locked_fails() {
        let store = store_with_stock(5).await;
        store.deduct(SKU, 1).await.unwrap();

        let result = store.release(SKU, 2).await;
        assert!(matches!(
            result,
            Err(StoreError::ReleaseInsufficient { requested: 2, .. })
        ));
    }

    #[tokio::test]
    async fn sale_count_failure_keeps_deduction() {
        let store = store_with_stock(5).await;
        store.set_fail_on_sale_count(true);

        store.deduct(SKU, 2).await.unwrap();

        let level = store.stock(SKU).await.unwrap().unwrap();
        assert_eq!(level.available, 3);
        assert_eq!(store.sale_count(SKU).await, Some(0));
    }

    #[tokio::test]
    async fn catalog_omits_unknown_skus() {
        let store = store_with_stock(5).await;
        let found = store
            .get_skus_by_ids(&[SKU, SkuId::new(404)])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&SKU].name, "widget");
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_order() {
        let store = InMemoryStore::new();
        store.insert_order(&order(1, 7)).await.unwrap();

        let result = store.insert_order(&order(1, 7)).await;
        assert!(matches!(result, Err(StoreError::DuplicateOrder(_))));
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn transition_only_from_expected_status() {
        let store = InMemoryStore::new();
        store.insert_order(&order(1, 7)).await.unwrap();
        let id = OrderId::new(1);

        let first = store
            .transition_status(id, OrderStatus::Placed, OrderStatus::Canceled)
            .await
            .unwrap();
        let second = store
            .transition_status(id, OrderStatus::Placed, OrderStatus::Paid)
            .await
            .unwrap();

        assert_eq!(first, Affected::ONE);
        assert_eq!(second, Affected::NONE);
        assert_eq!(
            store.order_status(id).await.unwrap(),
            Some(OrderStatus::Canceled)
        );
    }

    #[tokio::test]
    async fn transition_unknown_order_affects_nothing() {
        let store = InMemoryStore::new();
        let affected = store
            .transition_status(OrderId::new(5), OrderStatus::Placed, OrderStatus::Paid)
            .await
            .unwrap();
        assert!(affected.is_none());
    }

    #[tokio::test]
    async fn list_orders_newest_first() {
        let store = InMemoryStore::new();
        let mut older = order(1, 7);
        older.created_at = Utc::now() - Duration::minutes(5);
        store.insert_order(&older).await.unwrap();
        store.insert_order(&order(2, 7)).await.unwrap();
        store.insert_order(&order(3, 8)).await.unwrap();

        let listed = store.list_orders_for_user(UserId::new(7)).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|o| o.order_id.as_u64()).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn cart_keeps_insertion_order() {
        let store = InMemoryStore::new();
        let user = UserId::new(1);
        store.add_to_cart(user, SkuId::new(2), 1).await;
        store.add_to_cart(user, SkuId::new(1), 3).await;

        let lines = store.cart_lines(user).await.unwrap();
        assert_eq!(lines[0].sku_id, SkuId::new(2));
        assert_eq!(lines[1].quantity, 3);
        assert!(store.cart_lines(UserId::new(2)).await.unwrap().is_empty());
    }
}

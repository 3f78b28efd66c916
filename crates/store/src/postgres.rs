use std::collections::HashMap;

use async_trait::async_trait;
use common::{Money, OrderId, SkuId, UserId};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    CartLine, Order, OrderItem, OrderStatus, Result, ShippingAddress, Sku, StockLevel, StoreError,
    store::{Affected, CartStore, OrderRepository, SkuCatalog, StockLedger},
};

const ORDER_COLUMNS: &str = "order_id, user_id, email, ship_name, street_address, city, zip_code, status, total, created_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_sku(row: &PgRow) -> Result<Sku> {
        Ok(Sku {
            sku_id: SkuId::from(row.try_get::<i64, _>("sku_id")?),
            name: row.try_get("name")?,
            price: Money::new(row.try_get::<Decimal, _>("price")?),
            available_stock: row.try_get("available_stock")?,
            locked_stock: row.try_get("locked_stock")?,
            version: row.try_get("version")?,
            sale_count: row.try_get("sale_count")?,
        })
    }

    fn row_to_order(row: &PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        Ok(Order {
            order_id: OrderId::from(row.try_get::<i64, _>("order_id")?),
            user_id: UserId::from(row.try_get::<i64, _>("user_id")?),
            email: row.try_get("email")?,
            shipping_address: ShippingAddress {
                name: row.try_get("ship_name")?,
                street_address: row.try_get("street_address")?,
                city: row.try_get("city")?,
                zip_code: row.try_get("zip_code")?,
            },
            status: status.parse().map_err(StoreError::InvalidRow)?,
            total: Money::new(row.try_get::<Decimal, _>("total")?),
            created_at: row.try_get("created_at")?,
            items: Vec::new(),
        })
    }

    fn row_to_item(row: &PgRow) -> Result<OrderItem> {
        let quantity: i32 = row.try_get("quantity")?;
        Ok(OrderItem {
            order_id: OrderId::from(row.try_get::<i64, _>("order_id")?),
            sku_id: SkuId::from(row.try_get::<i64, _>("sku_id")?),
            name: row.try_get("name")?,
            price: Money::new(row.try_get::<Decimal, _>("price")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::InvalidRow(format!("negative quantity {quantity}")))?,
        })
    }

    /// Loads the items of every order in `orders` with one query.
    async fn attach_items(&self, orders: &mut [Order]) -> Result<()> {
        if orders.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = orders.iter().map(|o| o.order_id.as_i64()).collect();
        let rows = sqlx::query(
            r#"
            SELECT order_id, sku_id, name, price, quantity
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, line_no
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_order: HashMap<OrderId, Vec<OrderItem>> = HashMap::new();
        for row in &rows {
            let item = Self::row_to_item(row)?;
            by_order.entry(item.order_id).or_default().push(item);
        }
        for order in orders.iter_mut() {
            order.items = by_order.remove(&order.order_id).unwrap_or_default();
        }
        Ok(())
    }
}

#[async_trait]
impl StockLedger for PostgresStore {
    async fn deduct_if_available(&self, sku_id: SkuId, count: u32) -> Result<Affected> {
        let result = sqlx::query(
            r#"
            UPDATE product_skus
            SET available_stock = available_stock - $2,
                locked_stock = locked_stock + $2,
                version = version + 1,
                updated_at = NOW()
            WHERE sku_id = $1 AND available_stock >= $2
            "#,
        )
        .bind(sku_id.as_i64())
        .bind(i64::from(count))
        .execute(&self.pool)
        .await?;

        Ok(Affected(result.rows_affected()))
    }

    async fn release_if_locked(&self, sku_id: SkuId, count: u32) -> Result<Affected> {
        let result = sqlx::query(
            r#"
            UPDATE product_skus
            SET locked_stock = locked_stock - $2,
                available_stock = available_stock + $2,
                version = version + 1,
                updated_at = NOW()
            WHERE sku_id = $1 AND locked_stock >= $2
            "#,
        )
        .bind(sku_id.as_i64())
        .bind(i64::from(count))
        .execute(&self.pool)
        .await?;

        Ok(Affected(result.rows_affected()))
    }

    async fn adjust_sale_count(&self, sku_id: SkuId, delta: i64) -> Result<()> {
        sqlx::query(
            "UPDATE product_skus SET sale_count = GREATEST(sale_count + $2, 0) WHERE sku_id = $1",
        )
        .bind(sku_id.as_i64())
        .bind(delta)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn stock(&self, sku_id: SkuId) -> Result<Option<StockLevel>> {
        let row: Option<PgRow> = sqlx::query(
            "SELECT available_stock, locked_stock, version FROM product_skus WHERE sku_id = $1",
        )
        .bind(sku_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(StockLevel {
                available: row.try_get("available_stock")?,
                locked: row.try_get("locked_stock")?,
                version: row.try_get("version")?,
            })),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SkuCatalog for PostgresStore {
    async fn get_skus_by_ids(&self, sku_ids: &[SkuId]) -> Result<HashMap<SkuId, Sku>> {
        let ids: Vec<i64> = sku_ids.iter().map(SkuId::as_i64).collect();
        let rows = sqlx::query(
            r#"
            SELECT sku_id, name, price, available_stock, locked_stock, version, sale_count
            FROM product_skus
            WHERE sku_id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Self::row_to_sku(row).map(|sku| (sku.sku_id, sku)))
            .collect()
    }

    async fn upsert_sku(&self, sku: &Sku) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO product_skus (sku_id, name, price, available_stock, locked_stock, version, sale_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (sku_id) DO UPDATE SET
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                available_stock = EXCLUDED.available_stock,
                locked_stock = EXCLUDED.locked_stock,
                version = EXCLUDED.version,
                sale_count = EXCLUDED.sale_count,
                updated_at = NOW()
            "#,
        )
        .bind(sku.sku_id.as_i64())
        .bind(&sku.name)
        .bind(sku.price.amount())
        .bind(sku.available_stock)
        .bind(sku.locked_stock)
        .bind(sku.version)
        .bind(sku.sale_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (order_id, user_id, email, ship_name, street_address, city, zip_code, status, total, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.order_id.as_i64())
        .bind(order.user_id.as_i64())
        .bind(&order.email)
        .bind(&order.shipping_address.name)
        .bind(&order.shipping_address.street_address)
        .bind(&order.shipping_address.city)
        .bind(&order.shipping_address.zip_code)
        .bind(order.status.as_str())
        .bind(order.total.amount())
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("orders_pkey")
            {
                return StoreError::DuplicateOrder(order.order_id);
            }
            StoreError::Database(e)
        })?;

        for (line_no, item) in order.items.iter().enumerate() {
            let quantity = i32::try_from(item.quantity)
                .map_err(|_| StoreError::InvalidRow(format!("quantity {} too large", item.quantity)))?;

            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, line_no, sku_id, name, price, quantity)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.order_id.as_i64())
            .bind(line_no as i32)
            .bind(item.sku_id.as_i64())
            .bind(&item.name)
            .bind(item.price.amount())
            .bind(quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn order_exists(&self, order_id: OrderId) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE order_id = $1)")
                .bind(order_id.as_i64())
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn find_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1");
        let row: Option<PgRow> = sqlx::query(&sql)
            .bind(order_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut orders = [Self::row_to_order(&row)?];
        self.attach_items(&mut orders).await?;
        let [order] = orders;
        Ok(Some(order))
    }

    async fn order_status(&self, order_id: OrderId) -> Result<Option<OrderStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM orders WHERE order_id = $1")
                .bind(order_id.as_i64())
                .fetch_optional(&self.pool)
                .await?;

        status
            .map(|s| s.parse().map_err(StoreError::InvalidRow))
            .transpose()
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC, order_id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_i64())
            .fetch_all(&self.pool)
            .await?;

        let mut orders = rows
            .iter()
            .map(Self::row_to_order)
            .collect::<Result<Vec<_>>>()?;
        self.attach_items(&mut orders).await?;
        Ok(orders)
    }

    async fn transition_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Affected> {
        let result = sqlx::query(
            "UPDATE orders SET status = $3, updated_at = NOW() WHERE order_id = $1 AND status = $2",
        )
        .bind(order_id.as_i64())
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        Ok(Affected(result.rows_affected()))
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(
            "SELECT sku_id, quantity FROM cart_items WHERE user_id = $1 ORDER BY added_at, sku_id",
        )
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<CartLine> {
                Ok(CartLine {
                    sku_id: SkuId::from(row.try_get::<i64, _>("sku_id")?),
                    quantity: i64::from(row.try_get::<i32, _>("quantity")?),
                })
            })
            .collect()
    }
}

//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{Money, OrderId, SkuId, UserId};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    Affected, CartStore, Order, OrderItem, OrderRepository, OrderStatus, PostgresStore,
    ShippingAddress, Sku, SkuCatalog, StockLedger, StockLedgerExt, StoreError,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_checkout_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE order_items, orders, product_skus, cart_items")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::new(pool)
}

const SKU: SkuId = SkuId::new(100);

async fn seed_sku(store: &PostgresStore, stock: i64) {
    store
        .upsert_sku(&Sku::new(SKU, "widget", "19.99".parse().unwrap(), stock))
        .await
        .unwrap();
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
        total: "49.97".parse().unwrap(),
        created_at: Utc::now(),
        items: vec![
            OrderItem {
                order_id,
                sku_id: SKU,
                name: "widget".to_string(),
                price: "19.99".parse().unwrap(),
                quantity: 2,
            },
            OrderItem {
                order_id,
                sku_id: SkuId::new(200),
                name: "gadget".to_string(),
                price: Money::from_cents(999),
                quantity: 1,
            },
        ],
    }
}

#[tokio::test]
#[serial]
async fn deduct_and_release_conserve_total() {
    let store = get_test_store().await;
    seed_sku(&store, 5).await;

    store.deduct(SKU, 2).await.unwrap();
    let locked = store.stock(SKU).await.unwrap().unwrap();
    assert_eq!((locked.available, locked.locked, locked.version), (3, 2, 2));

    store.release(SKU, 2).await.unwrap();
    let released = store.stock(SKU).await.unwrap().unwrap();
    assert_eq!((released.available, released.locked), (5, 0));
    assert_eq!(released.total(), 5);
    assert_eq!(released.version, 3);
}

#[tokio::test]
#[serial]
async fn guarded_deduct_rejects_shortfall() {
    let store = get_test_store().await;
    seed_sku(&store, 1).await;

    let affected = store.deduct_if_available(SKU, 2).await.unwrap();
    assert_eq!(affected, Affected::NONE);

    let result = store.deduct(SKU, 2).await;
    assert!(matches!(result, Err(StoreError::StockInsufficient { .. })));

    let level = store.stock(SKU).await.unwrap().unwrap();
    assert_eq!((level.available, level.locked, level.version), (1, 0, 1));
}

#[tokio::test]
#[serial]
async fn concurrent_deducts_never_oversell() {
    let store = get_test_store().await;
    seed_sku(&store, 10).await;

    let handles: Vec<_> = (0..25)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.deduct(SKU, 1).await.is_ok() })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 10);
    let level = store.stock(SKU).await.unwrap().unwrap();
    assert_eq!((level.available, level.locked), (0, 10));
}

#[tokio::test]
#[serial]
async fn catalog_round_trips_price_snapshot() {
    let store = get_test_store().await;
    seed_sku(&store, 5).await;

    let found = store
        .get_skus_by_ids(&[SKU, SkuId::new(404)])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[&SKU].price.to_string(), "19.99");
    assert_eq!(found[&SKU].available_stock, 5);
}

#[tokio::test]
#[serial]
async fn order_is_written_with_items_in_line_order() {
    let store = get_test_store().await;
    store.insert_order(&order(1, 7)).await.unwrap();

    assert!(store.order_exists(OrderId::new(1)).await.unwrap());
    let loaded = store.find_order(OrderId::new(1)).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrderStatus::Placed);
    assert_eq!(loaded.total.to_string(), "49.97");
    assert_eq!(loaded.shipping_address.city, "Springfield");
    assert_eq!(loaded.items.len(), 2);
    assert_eq!(loaded.items[0].sku_id, SKU);
    assert_eq!(loaded.items[1].name, "gadget");
}

#[tokio::test]
#[serial]
async fn duplicate_order_id_is_reported() {
    let store = get_test_store().await;
    store.insert_order(&order(1, 7)).await.unwrap();

    let result = store.insert_order(&order(1, 7)).await;
    assert!(matches!(result, Err(StoreError::DuplicateOrder(_))));
}

#[tokio::test]
#[serial]
async fn status_transition_is_guarded() {
    let store = get_test_store().await;
    store.insert_order(&order(1, 7)).await.unwrap();
    let id = OrderId::new(1);

    let paid = store
        .transition_status(id, OrderStatus::Placed, OrderStatus::Paid)
        .await
        .unwrap();
    let canceled = store
        .transition_status(id, OrderStatus::Placed, OrderStatus::Canceled)
        .await
        .unwrap();

    assert_eq!(paid, Affected::ONE);
    assert_eq!(canceled, Affected::NONE);
    assert_eq!(store.order_status(id).await.unwrap(), Some(OrderStatus::Paid));
}

#[tokio::test]
#[serial]
async fn list_orders_for_user_newest_first() {
    let store = get_test_store().await;
    let mut older = order(1, 7);
    older.created_at = Utc::now() - chrono::Duration::minutes(1);
    store.insert_order(&older).await.unwrap();
    store.insert_order(&order(2, 7)).await.unwrap();
    store.insert_order(&order(3, 9)).await.unwrap();

    let orders = store.list_orders_for_user(UserId::new(7)).await.unwrap();
    let ids: Vec<_> = orders.iter().map(|o| o.order_id.as_u64()).collect();
    assert_eq!(ids, vec![2, 1]);
    assert!(orders.iter().all(|o| o.items.len() == 2));
}

#[tokio::test]
#[serial]
async fn cart_lines_are_read_per_user() {
    let store = get_test_store().await;
    sqlx::query(
        "INSERT INTO cart_items (user_id, sku_id, quantity, added_at) VALUES (7, 100, 2, NOW() - INTERVAL '1 minute'), (7, 200, 1, NOW())",
    )
    .execute(store.pool())
    .await
    .unwrap();

    let lines = store.cart_lines(UserId::new(7)).await.unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].sku_id, SKU);
    assert_eq!(lines[0].quantity, 2);
    assert!(store.cart_lines(UserId::new(8)).await.unwrap().is_empty());
}

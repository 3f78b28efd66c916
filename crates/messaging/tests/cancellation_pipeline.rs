//! Delayed cancellation, end to end: the order service publishes a timer,
//! the delay queue holds it for the grace period, and a cancel worker acts
//! on whatever status the order has by then.
//!
//! These run on a paused tokio clock so the grace period passes instantly.

use std::sync::Arc;
use std::time::Duration;

use common::{SkuId, Snowflake, UserId};
use domain::{OrderLine, OrderService, OrderStatus, PlaceOrder, ShippingAddress};
use messaging::topology::{CANCEL_QUEUE, ORDER_QUEUE};
use messaging::{
    Broker, BrokerOrderPublisher, CancellationHandler, Disposition, InMemoryBroker,
    IngestionHandler, MessageHandler, Topology, WorkerPool,
};
use store::{InMemoryStore, Sku, StockLedger};

const WIDGET: SkuId = SkuId::new(100);
const GRACE: Duration = Duration::from_secs(30 * 60);

type Service = OrderService<InMemoryStore, BrokerOrderPublisher<InMemoryBroker>>;

struct Harness {
    service: Arc<Service>,
    store: InMemoryStore,
    broker: Arc<InMemoryBroker>,
    pool: WorkerPool,
}

async fn harness() -> Harness {
    let store = InMemoryStore::new();
    store
        .put_sku(Sku::new(WIDGET, "widget", "19.99".parse().unwrap(), 5))
        .await;

    let broker = Arc::new(InMemoryBroker::new(Topology::checkout(GRACE)));
    let service = Arc::new(OrderService::new(
        store.clone(),
        BrokerOrderPublisher::new(Arc::clone(&broker)),
        Arc::new(Snowflake::new(1).unwrap()),
    ));

    let handler = Arc::new(CancellationHandler::new(Arc::clone(&service)));
    let pool = WorkerPool::spawn(Arc::clone(&broker), CANCEL_QUEUE, 2, handler)
        .await
        .unwrap();

    Harness {
        service,
        store,
        broker,
        pool,
    }
}

fn two_widgets() -> PlaceOrder {
    PlaceOrder::new(
        UserId::new(7),
        "ada@example.com",
        ShippingAddress {
            name: "Ada".to_string(),
            street_address: "1 Main St".to_string(),
            city: "Springfield".to_string(),
            zip_code: "12345".to_string(),
        },
        vec![OrderLine::new(WIDGET, "widget", "19.99".parse().unwrap(), 2)],
    )
}

async fn stock(store: &InMemoryStore) -> (i64, i64) {
    let level = store.stock(WIDGET).await.unwrap().unwrap();
    (level.available, level.locked)
}

/// Sleeps past the grace period, then lets the workers drain the queue.
async fn run_past_grace(broker: &InMemoryBroker) {
    tokio::time::sleep(GRACE + Duration::from_secs(1)).await;
    while broker.depth(CANCEL_QUEUE) > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test(start_paused = true)]
async fn unpaid_order_is_canceled_after_grace_period() {
    let h = harness().await;

    let order = h.service.place_order(two_widgets()).await.unwrap();
    assert_eq!(stock(&h.store).await, (3, 2));
    assert_eq!(h.broker.depth(CANCEL_QUEUE), 1);

    tokio::time::sleep(GRACE - Duration::from_secs(1)).await;
    let early = h.service.get_order(order.order_id).await.unwrap();
    assert_eq!(early.status, OrderStatus::Placed);

    run_past_grace(&h.broker).await;

    let canceled = h.service.get_order(order.order_id).await.unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);
    assert_eq!(stock(&h.store).await, (5, 0));

    h.pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn repeated_timer_does_not_release_twice() {
    let h = harness().await;

    let order = h.service.place_order(two_widgets()).await.unwrap();
    run_past_grace(&h.broker).await;
    assert_eq!(stock(&h.store).await, (5, 0));

    // a second timer for the same order, as after a redelivery
    let publisher = BrokerOrderPublisher::new(Arc::clone(&h.broker));
    domain::OrderPublisher::schedule_cancellation(&publisher, &order)
        .await
        .unwrap();
    run_past_grace(&h.broker).await;

    let stored = h.service.get_order(order.order_id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Canceled);
    assert_eq!(stock(&h.store).await, (5, 0));

    h.pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn paid_order_survives_its_timer() {
    let h = harness().await;

    let order = h.service.place_order(two_widgets()).await.unwrap();
    h.service.mark_paid(order.order_id).await.unwrap();

    run_past_grace(&h.broker).await;

    let stored = h.service.get_order(order.order_id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
    assert_eq!(stock(&h.store).await, (3, 2));

    h.pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn manually_canceled_order_is_left_alone() {
    let h = harness().await;

    let order = h.service.place_order(two_widgets()).await.unwrap();
    h.service.cancel(order.order_id).await.unwrap();
    assert_eq!(stock(&h.store).await, (5, 0));

    run_past_grace(&h.broker).await;

    let stored = h.service.get_order(order.order_id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Canceled);
    assert_eq!(stock(&h.store).await, (5, 0));

    h.pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn timers_for_many_orders_all_fire() {
    let h = harness().await;

    let mut ids = Vec::new();
    for _ in 0..2 {
        let cmd = PlaceOrder {
            lines: vec![OrderLine::new(WIDGET, "widget", "19.99".parse().unwrap(), 1)],
            ..two_widgets()
        };
        ids.push(h.service.place_order(cmd).await.unwrap().order_id);
    }
    assert_eq!(stock(&h.store).await, (3, 2));

    run_past_grace(&h.broker).await;

    for id in ids {
        let stored = h.service.get_order(id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Canceled);
    }
    assert_eq!(stock(&h.store).await, (5, 0));

    h.pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn late_ingested_order_still_gets_its_timer() {
    let h = harness().await;

    let order = h.service.accept_order(two_widgets()).await.unwrap();
    assert_eq!(stock(&h.store).await, (3, 2));

    // ingestion stalls for longer than the grace period
    run_past_grace(&h.broker).await;
    assert!(h.service.get_order(order.order_id).await.is_err());

    let ingestion = IngestionHandler::new(Arc::clone(&h.service), Arc::clone(&h.broker));
    let mut queue = h.broker.subscribe(ORDER_QUEUE).await.unwrap();
    let delivery = queue.next().await.unwrap();
    assert_eq!(ingestion.handle(&delivery).await, Disposition::Ack);
    queue.ack(&delivery).await.unwrap();

    let written = h.service.get_order(order.order_id).await.unwrap();
    assert_eq!(written.status, OrderStatus::Placed);
    assert_eq!(h.broker.depth(CANCEL_QUEUE), 1);

    run_past_grace(&h.broker).await;

    let stored = h.service.get_order(order.order_id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Canceled);
    assert_eq!(stock(&h.store).await, (5, 0));

    h.pool.shutdown().await;
}

//! Asynchronous order ingestion: accepted orders travel through the order
//! queue and are written by ingestion workers, with bounded retry and a
//! dead-letter queue for orders that cannot be written.

use std::sync::Arc;
use std::time::Duration;

use common::{SkuId, Snowflake, UserId};
use domain::{OrderLine, OrderService, OrderStatus, PlaceOrder, ShippingAddress};
use messaging::topology::{ORDER_DEAD_LETTER_QUEUE, ORDER_QUEUE};
use messaging::{
    Broker, BrokerOrderPublisher, Delivery, Disposition, IngestionHandler, InMemoryBroker,
    MessageHandler, OrderIngestionMessage, Topology, WorkerPool,
};
use store::{InMemoryStore, Sku, StockLedger};

const WIDGET: SkuId = SkuId::new(100);
const RETRY_DELAY: Duration = Duration::from_millis(50);

type Service = OrderService<InMemoryStore, BrokerOrderPublisher<InMemoryBroker>>;
type Handler = IngestionHandler<InMemoryStore, BrokerOrderPublisher<InMemoryBroker>, InMemoryBroker>;

async fn setup() -> (Arc<Service>, InMemoryStore, Arc<InMemoryBroker>) {
    let store = InMemoryStore::new();
    store
        .put_sku(Sku::new(WIDGET, "widget", "19.99".parse().unwrap(), 5))
        .await;

    let broker = Arc::new(InMemoryBroker::new(Topology::checkout_with_retry_delay(
        Duration::from_secs(3600),
        RETRY_DELAY,
    )));
    let service = Arc::new(OrderService::new(
        store.clone(),
        BrokerOrderPublisher::new(Arc::clone(&broker)),
        Arc::new(Snowflake::new(2).unwrap()),
    ));
    (service, store, broker)
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

async fn wait_for<F, Fut>(mut done: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn delivery(message: &OrderIngestionMessage, tag: u64) -> Delivery {
    Delivery {
        tag,
        queue: ORDER_QUEUE.to_string(),
        message_id: message.message_id(),
        body: serde_json::to_vec(message).unwrap(),
        attempts: 1,
    }
}

mod workers {
    use super::*;

    #[tokio::test]
    async fn accepted_order_is_persisted() {
        let (service, store, broker) = setup().await;
        let handler = Arc::new(IngestionHandler::new(Arc::clone(&service), Arc::clone(&broker)));
        let pool = WorkerPool::spawn(Arc::clone(&broker), ORDER_QUEUE, 3, handler)
            .await
            .unwrap();

        let order = service.accept_order(two_widgets()).await.unwrap();
        assert_eq!(stock(&store).await, (3, 2));

        wait_for(|| {
            let store = store.clone();
            async move { store.order_count().await == 1 }
        })
        .await;
        pool.shutdown().await;

        let stored = service.get_order(order.order_id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Placed);
        assert_eq!(stored.items, order.items);
        assert_eq!(stock(&store).await, (3, 2));
        assert_eq!(broker.depth(ORDER_QUEUE), 0);
    }

    #[tokio::test]
    async fn failing_writes_end_in_dead_letter_queue_with_stock_released() {
        let (service, store, broker) = setup().await;
        store.set_fail_on_insert(true);

        let handler = Arc::new(IngestionHandler::new(Arc::clone(&service), Arc::clone(&broker)));
        let pool = WorkerPool::spawn(Arc::clone(&broker), ORDER_QUEUE, 2, handler)
            .await
            .unwrap();

        service.accept_order(two_widgets()).await.unwrap();

        wait_for(|| {
            let broker = Arc::clone(&broker);
            async move { broker.depth(ORDER_DEAD_LETTER_QUEUE) == 1 }
        })
        .await;
        pool.shutdown().await;

        assert_eq!(store.order_count().await, 0);
        assert_eq!(stock(&store).await, (5, 0));
        assert_eq!(broker.depth(ORDER_QUEUE), 0);

        let mut dlq = broker.subscribe(ORDER_DEAD_LETTER_QUEUE).await.unwrap();
        let dead: OrderIngestionMessage = dlq.next().await.unwrap().json().unwrap();
        assert_eq!(dead.retry, 3);
    }
}

mod handler {
    use super::*;

    fn handler(service: &Arc<Service>, broker: &Arc<InMemoryBroker>) -> Handler {
        IngestionHandler::new(Arc::clone(service), Arc::clone(broker))
    }

    #[tokio::test]
    async fn failed_write_is_republished_with_bumped_retry() {
        let (service, store, broker) = setup().await;
        let order = service.accept_order(two_widgets()).await.unwrap();
        let mut queue = broker.subscribe(ORDER_QUEUE).await.unwrap();
        let original = queue.next().await.unwrap();

        store.set_fail_on_insert(true);
        let disposition = handler(&service, &broker).handle(&original).await;
        assert_eq!(disposition, Disposition::Ack);

        let retried: OrderIngestionMessage = queue.next().await.unwrap().json().unwrap();
        assert_eq!(retried.retry, 1);
        assert_eq!(retried.order.order_id, order.order_id);
        assert_eq!(stock(&store).await, (3, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_waits_for_the_retry_delay() {
        let (service, store, broker) = setup().await;
        service.accept_order(two_widgets()).await.unwrap();
        let mut queue = broker.subscribe(ORDER_QUEUE).await.unwrap();
        let original = queue.next().await.unwrap();

        store.set_fail_on_insert(true);
        let failed_at = tokio::time::Instant::now();
        assert_eq!(
            handler(&service, &broker).handle(&original).await,
            Disposition::Ack
        );

        assert!(
            tokio::time::timeout(RETRY_DELAY / 2, queue.next())
                .await
                .is_err()
        );

        let retried: OrderIngestionMessage = queue.next().await.unwrap().json().unwrap();
        assert_eq!(retried.retry, 1);
        assert!(failed_at.elapsed() >= RETRY_DELAY);
    }

    #[tokio::test]
    async fn retry_at_limit_is_dead_lettered() {
        let (service, store, broker) = setup().await;
        let order = service.accept_order(two_widgets()).await.unwrap();
        store.set_fail_on_insert(true);

        let message = OrderIngestionMessage {
            order,
            retry: 2,
        };
        let handler = handler(&service, &broker).with_max_retries(2);
        let disposition = handler.handle(&delivery(&message, 1)).await;

        assert_eq!(disposition, Disposition::Reject { requeue: false });
        assert_eq!(stock(&store).await, (5, 0));
    }

    #[tokio::test]
    async fn redelivered_order_is_written_once() {
        let (service, store, broker) = setup().await;
        let order = service.accept_order(two_widgets()).await.unwrap();
        let message = OrderIngestionMessage::new(order);
        let handler = handler(&service, &broker);

        assert_eq!(handler.handle(&delivery(&message, 1)).await, Disposition::Ack);
        assert_eq!(handler.handle(&delivery(&message, 2)).await, Disposition::Ack);

        assert_eq!(store.order_count().await, 1);
        assert_eq!(stock(&store).await, (3, 2));
    }

    #[tokio::test]
    async fn malformed_message_is_rejected() {
        let (service, _store, broker) = setup().await;
        let handler = handler(&service, &broker);

        let garbage = Delivery {
            tag: 1,
            queue: ORDER_QUEUE.to_string(),
            message_id: "garbage".to_string(),
            body: b"{not json".to_vec(),
            attempts: 1,
        };

        assert_eq!(
            handler.handle(&garbage).await,
            Disposition::Reject { requeue: false }
        );
    }

    #[tokio::test]
    async fn failed_republish_dead_letters_and_releases_stock() {
        let (service, store, _broker) = setup().await;
        let order = service.accept_order(two_widgets()).await.unwrap();
        store.set_fail_on_insert(true);

        // a broker with no bindings cannot take the retry
        let unroutable = Arc::new(InMemoryBroker::new(Topology::new()));
        let handler = IngestionHandler::new(Arc::clone(&service), unroutable);

        let message = OrderIngestionMessage::new(order);
        let disposition = handler.handle(&delivery(&message, 1)).await;

        assert_eq!(disposition, Disposition::Reject { requeue: false });
        assert_eq!(stock(&store).await, (5, 0));
    }
}

//! Application state and worker wiring.

use std::sync::Arc;

use checkout::{
    CardPaymentService, CheckoutOrchestrator, StoreCartService, StoreCatalogService,
};
use common::{IdError, Snowflake};
use domain::OrderService;
use messaging::topology::{CANCEL_QUEUE, ORDER_QUEUE};
use messaging::{
    Broker, BrokerError, BrokerOrderPublisher, CancellationHandler, IngestionHandler, WorkerPool,
};
use store::{CartStore, OrderRepository, SkuCatalog, StockLedger};
use thiserror::Error;

use crate::config::Config;

/// Everything the checkout system needs from its store.
pub trait CheckoutStore:
    StockLedger + OrderRepository + SkuCatalog + CartStore + Clone + 'static
{
}

impl<T> CheckoutStore for T where
    T: StockLedger + OrderRepository + SkuCatalog + CartStore + Clone + 'static
{
}

pub type Orders<S> = OrderService<S, BrokerOrderPublisher<dyn Broker>>;

pub type Checkout<S> = CheckoutOrchestrator<
    StoreCartService<S>,
    StoreCatalogService<S>,
    Arc<Orders<S>>,
    CardPaymentService,
>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: CheckoutStore> {
    pub orders: Arc<Orders<S>>,
    pub checkout: Checkout<S>,
}

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Invalid snowflake node id: {0}")]
    NodeId(#[from] IdError),

    #[error("Worker pool failed to start: {0}")]
    Workers(#[from] BrokerError),
}

/// Wires the order service and checkout saga on top of a store and broker.
pub fn build_state<S: CheckoutStore>(
    store: S,
    broker: Arc<dyn Broker>,
    config: &Config,
) -> Result<Arc<AppState<S>>, StartupError> {
    let ids = Arc::new(Snowflake::new(config.snowflake_node_id)?);

    // leave placement room to finish inside the checkout's own call timeout
    let publisher = BrokerOrderPublisher::new(broker).with_timeout(config.remote_call_timeout / 2);
    let orders = Arc::new(OrderService::new(store.clone(), publisher, Arc::clone(&ids)));

    let checkout = CheckoutOrchestrator::new(
        StoreCartService::new(store.clone()),
        StoreCatalogService::new(store),
        Arc::clone(&orders),
        CardPaymentService::new(ids),
    )
    .with_call_timeout(config.remote_call_timeout);

    Ok(Arc::new(AppState { orders, checkout }))
}

/// Starts the cancel and ingestion worker pools.
pub async fn start_workers<S: CheckoutStore>(
    state: &AppState<S>,
    broker: Arc<dyn Broker>,
    config: &Config,
) -> Result<Vec<WorkerPool>, StartupError> {
    let cancel = WorkerPool::spawn(
        Arc::clone(&broker),
        CANCEL_QUEUE,
        config.cancel_workers,
        Arc::new(CancellationHandler::new(Arc::clone(&state.orders))),
    )
    .await?;

    let ingestion_handler = IngestionHandler::new(Arc::clone(&state.orders), Arc::clone(&broker))
        .with_max_retries(config.ingest_max_retries)
        .with_publish_timeout(config.remote_call_timeout);
    let ingestion = match WorkerPool::spawn(
        broker,
        ORDER_QUEUE,
        config.ingest_workers,
        Arc::new(ingestion_handler),
    )
    .await
    {
        Ok(pool) => pool,
        Err(e) => {
            cancel.shutdown().await;
            return Err(e.into());
        }
    };

    Ok(vec![cancel, ingestion])
}

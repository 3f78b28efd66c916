//! Messaging for the checkout system.
//!
//! This crate provides:
//! - a [`Broker`] abstraction with direct exchanges, queue TTLs and
//!   dead-letter routing, backed by memory or by PostgreSQL
//! - the cancellation timer: every placed order publishes a message that
//!   expires into the cancel queue after the grace period
//! - the ingestion pipeline that persists accepted orders with bounded retry
//! - a [`WorkerPool`] running independent consumers per queue

pub mod broker;
pub mod cancellation;
pub mod error;
pub mod ingestion;
pub mod message;
pub mod publisher;
pub mod topology;
pub mod worker;

pub use broker::{
    Broker, BrokerExt, Delivery, InMemoryBroker, OutboundMessage, PostgresBroker, Subscription,
};
pub use cancellation::CancellationHandler;
pub use error::{BrokerError, Result};
pub use ingestion::{DEFAULT_MAX_RETRIES, IngestionHandler};
pub use message::{CancellationTimerMessage, OrderIngestionMessage};
pub use publisher::{BrokerOrderPublisher, DEFAULT_PUBLISH_TIMEOUT};
pub use topology::{DEFAULT_GRACE_PERIOD, DEFAULT_RETRY_DELAY, Placement, Topology};
pub use worker::{Disposition, MessageHandler, WorkerPool};

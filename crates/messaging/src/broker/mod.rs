//! Broker trait and backends.

mod memory;
mod postgres;

pub use memory::InMemoryBroker;
pub use postgres::PostgresBroker;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{BrokerError, Result};

/// A message ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub message_id: String,
    pub body: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(message_id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            message_id: message_id.into(),
            body,
        }
    }

    /// Encodes `payload` as a JSON body.
    pub fn json<T: Serialize + ?Sized>(message_id: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self::new(message_id, serde_json::to_vec(payload)?))
    }
}

/// A message handed to a consumer. It stays with the subscription until it
/// is acked or rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub queue: String,
    pub message_id: String,
    pub body: Vec<u8>,
    /// Number of times this message has been delivered, this one included.
    pub attempts: u32,
}

impl Delivery {
    /// Decodes the JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Publishes to exchanges and hands out queue subscriptions.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Routes a message to every queue bound to `exchange` under
    /// `routing_key`. Fails if no queue is bound.
    async fn publish(&self, exchange: &str, routing_key: &str, message: OutboundMessage)
    -> Result<()>;

    /// Starts consuming a queue. Every subscription is an independent
    /// consumer; a message goes to exactly one of them.
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>>;
}

/// A single consumer on one queue.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next deliverable message.
    async fn next(&mut self) -> Result<Delivery>;

    /// Removes the message from the queue.
    async fn ack(&mut self, delivery: &Delivery) -> Result<()>;

    /// Puts the message back on its queue, or, without `requeue`, sends it
    /// along the queue's dead-letter route.
    async fn reject(&mut self, delivery: &Delivery, requeue: bool) -> Result<()>;
}

/// Convenience methods for brokers.
#[async_trait]
pub trait BrokerExt: Broker {
    /// Publishes a JSON payload, failing if the broker does not confirm
    /// within `timeout`.
    async fn publish_json<T>(
        &self,
        exchange: &str,
        routing_key: &str,
        message_id: String,
        payload: &T,
        timeout: Duration,
    ) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let message = OutboundMessage::json(message_id, payload)?;
        tokio::time::timeout(timeout, self.publish(exchange, routing_key, message))
            .await
            .map_err(|_| BrokerError::Timeout(timeout))?
    }
}

impl<B: Broker + ?Sized> BrokerExt for B {}

//! Exchanges, queues and bindings.
//!
//! Exchanges are direct: a message goes to every queue bound to its
//! exchange under its exact routing key. A queue with a message TTL and a
//! dead-letter route is a holding queue: nothing consumes it, and every
//! message in it moves on along the dead-letter route once the TTL expires.
//! Brokers resolve that hop when publishing, so a message published to
//! `order.delay` lands in the cancel queue with a delay equal to the TTL.

use std::time::Duration;

use crate::error::{BrokerError, Result};

pub const ORDER_EXCHANGE: &str = "order_exchange";
pub const ORDER_DEAD_LETTER_EXCHANGE: &str = "order_exchange.dlx";
pub const ORDER_QUEUE: &str = "order_queue";
pub const ORDER_DEAD_LETTER_QUEUE: &str = "order_queue.dlq";
pub const ORDER_CREATE_KEY: &str = "order.create";
pub const ORDER_DEAD_KEY: &str = "order.dead";
pub const ORDER_RETRY_QUEUE: &str = "order_queue.retry";
pub const ORDER_RETRY_KEY: &str = "order.retry";

pub const DELAY_EXCHANGE: &str = "order_delay_exchange";
pub const DELAY_QUEUE: &str = "order_delay_queue";
pub const CANCEL_QUEUE: &str = "order_cancel_queue";
pub const DELAY_KEY: &str = "order.delay";
pub const CANCEL_KEY: &str = "order.cancel";

/// Default payment grace period before an unpaid order is canceled.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30 * 60);

/// Default wait before a failed order write is attempted again.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

// guards against dead-letter cycles in a misconfigured topology
const MAX_HOPS: usize = 8;

/// Where a queue sends rejected or expired messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub message_ttl: Option<Duration>,
    pub dead_letter: Option<DeadLetter>,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_ttl: None,
            dead_letter: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.message_ttl = Some(ttl);
        self
    }

    pub fn with_dead_letter(
        mut self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.dead_letter = Some(DeadLetter {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        });
        self
    }

    fn is_holding_queue(&self) -> bool {
        self.message_ttl.is_some() && self.dead_letter.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
}

/// A consumable queue and how long a message waits there before it can be
/// delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub queue: String,
    pub delay: Duration,
}

/// Declared queues and bindings.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    queues: Vec<QueueSpec>,
    bindings: Vec<Binding>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a queue, replacing any previous declaration with the same name.
    pub fn declare_queue(mut self, spec: QueueSpec) -> Self {
        self.queues.retain(|q| q.name != spec.name);
        self.queues.push(spec);
        self
    }

    pub fn bind(
        mut self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        self.bindings.push(Binding {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            queue: queue.into(),
        });
        self
    }

    /// The order pipelines: ingestion with its retry and dead-letter
    /// queues, and the delay queue that expires into the cancel queue after
    /// `grace_period`.
    pub fn checkout(grace_period: Duration) -> Self {
        Self::checkout_with_retry_delay(grace_period, DEFAULT_RETRY_DELAY)
    }

    /// Like [`Topology::checkout`], with retried orders held back for
    /// `retry_delay` before they reach the order queue again.
    pub fn checkout_with_retry_delay(grace_period: Duration, retry_delay: Duration) -> Self {
        Self::new()
            .declare_queue(
                QueueSpec::new(ORDER_QUEUE)
                    .with_dead_letter(ORDER_DEAD_LETTER_EXCHANGE, ORDER_DEAD_KEY),
            )
            .bind(ORDER_EXCHANGE, ORDER_CREATE_KEY, ORDER_QUEUE)
            .declare_queue(QueueSpec::new(ORDER_DEAD_LETTER_QUEUE))
            .bind(ORDER_DEAD_LETTER_EXCHANGE, ORDER_DEAD_KEY, ORDER_DEAD_LETTER_QUEUE)
            .declare_queue(
                QueueSpec::new(ORDER_RETRY_QUEUE)
                    .with_ttl(retry_delay)
                    .with_dead_letter(ORDER_EXCHANGE, ORDER_CREATE_KEY),
            )
            .bind(ORDER_EXCHANGE, ORDER_RETRY_KEY, ORDER_RETRY_QUEUE)
            .declare_queue(
                QueueSpec::new(DELAY_QUEUE)
                    .with_ttl(grace_period)
                    .with_dead_letter(DELAY_EXCHANGE, CANCEL_KEY),
            )
            .bind(DELAY_EXCHANGE, DELAY_KEY, DELAY_QUEUE)
            .declare_queue(QueueSpec::new(CANCEL_QUEUE))
            .bind(DELAY_EXCHANGE, CANCEL_KEY, CANCEL_QUEUE)
    }

    pub fn queue(&self, name: &str) -> Option<&QueueSpec> {
        self.queues.iter().find(|q| q.name == name)
    }

    /// Returns the queue if it is declared and can be consumed.
    pub fn consumable_queue(&self, name: &str) -> Result<&QueueSpec> {
        match self.queue(name) {
            Some(spec) if !spec.is_holding_queue() => Ok(spec),
            _ => Err(BrokerError::UnknownQueue(name.to_string())),
        }
    }

    /// Resolves a publish to the queues that will deliver it.
    pub fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<Placement>> {
        let mut placements = Vec::new();
        self.resolve(exchange, routing_key, Duration::ZERO, 0, &mut placements);
        if placements.is_empty() {
            return Err(BrokerError::Unroutable {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        Ok(placements)
    }

    /// Where a message rejected from `queue` goes. Empty if the queue has no
    /// dead-letter route, in which case the message is dropped.
    pub fn dead_letter_route(&self, queue: &str) -> Vec<Placement> {
        let mut placements = Vec::new();
        if let Some(DeadLetter {
            exchange,
            routing_key,
        }) = self.queue(queue).and_then(|q| q.dead_letter.as_ref())
        {
            self.resolve(exchange, routing_key, Duration::ZERO, 0, &mut placements);
        }
        placements
    }

    fn resolve(
        &self,
        exchange: &str,
        routing_key: &str,
        delay: Duration,
        hops: usize,
        out: &mut Vec<Placement>,
    ) {
        if hops > MAX_HOPS {
            tracing::warn!(exchange, routing_key, "Dead-letter chain too long, dropping");
            return;
        }

        let bound = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && b.routing_key == routing_key);

        for binding in bound {
            let Some(spec) = self.queue(&binding.queue) else {
                continue;
            };
            match (spec.message_ttl, &spec.dead_letter) {
                (Some(ttl), Some(dl)) => {
                    self.resolve(&dl.exchange, &dl.routing_key, delay + ttl, hops + 1, out)
                }
                _ => out.push(Placement {
                    queue: spec.name.clone(),
                    delay,
                }),
            }
        }
    }
}

//! In-memory broker for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{BrokerError, Result};
use crate::topology::{Placement, Topology};

use super::{Broker, Delivery, OutboundMessage, Subscription};

#[derive(Debug, Clone)]
struct QueuedMessage {
    seq: u64,
    available_at: Instant,
    message_id: String,
    body: Vec<u8>,
    attempts: u32,
}

impl QueuedMessage {
    fn order_key(&self) -> (Instant, u64) {
        (self.available_at, self.seq)
    }
}

#[derive(Debug, Default)]
struct State {
    // each queue is kept sorted by (available_at, seq)
    queues: HashMap<String, Vec<QueuedMessage>>,
    next_seq: u64,
    next_tag: u64,
}

impl State {
    fn enqueue(&mut self, queue: &str, mut message: QueuedMessage) {
        self.next_seq += 1;
        message.seq = self.next_seq;
        self.insert(queue, message);
    }

    fn insert(&mut self, queue: &str, message: QueuedMessage) {
        let pending = self.queues.entry(queue.to_string()).or_default();
        let key = message.order_key();
        let at = pending.partition_point(|m| m.order_key() <= key);
        pending.insert(at, message);
    }

    fn place(&mut self, placements: &[Placement], message_id: &str, body: &[u8]) {
        let now = Instant::now();
        for placement in placements {
            self.enqueue(
                &placement.queue,
                QueuedMessage {
                    seq: 0,
                    available_at: now + placement.delay,
                    message_id: message_id.to_string(),
                    body: body.to_vec(),
                    attempts: 0,
                },
            );
        }
    }

    /// Takes the head of `queue` if it is due, otherwise reports when it
    /// will be.
    fn take_due(&mut self, queue: &str, now: Instant) -> std::result::Result<QueuedMessage, Option<Instant>> {
        let pending = self.queues.entry(queue.to_string()).or_default();
        match pending.first() {
            Some(head) if head.available_at <= now => Ok(pending.remove(0)),
            Some(head) => Err(Some(head.available_at)),
            None => Err(None),
        }
    }
}

struct Inner {
    topology: Topology,
    state: Mutex<State>,
    notify: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Broker that keeps every queue in process memory.
///
/// Delays run on the tokio clock, so tests with a paused clock can advance
/// through a grace period instantly. Messages a subscription still holds
/// when it is dropped go back on their queue.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new(topology: Topology) -> Self {
        Self {
            inner: Arc::new(Inner {
                topology,
                state: Mutex::new(State::default()),
                notify: Notify::new(),
            }),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.inner.topology
    }

    /// Number of messages waiting on a queue, delayed ones included.
    pub fn depth(&self, queue: &str) -> usize {
        self.inner.lock().queues.get(queue).map_or(0, Vec::len)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<()> {
        let placements = self.inner.topology.route(exchange, routing_key)?;
        self.inner
            .lock()
            .place(&placements, &message.message_id, &message.body);
        self.inner.notify.notify_waiters();

        tracing::debug!(
            exchange,
            routing_key,
            message_id = %message.message_id,
            "Message published"
        );
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>> {
        self.inner.topology.consumable_queue(queue)?;
        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            queue: queue.to_string(),
            unacked: HashMap::new(),
        }))
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    queue: String,
    unacked: HashMap<u64, QueuedMessage>,
}

impl MemorySubscription {
    fn take_unacked(&mut self, delivery: &Delivery) -> Result<QueuedMessage> {
        self.unacked
            .remove(&delivery.tag)
            .ok_or(BrokerError::UnknownDelivery(delivery.tag))
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Delivery> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // register before looking so a publish in between is not missed
            notified.as_mut().enable();

            let wait_until = {
                let mut state = self.inner.lock();
                match state.take_due(&self.queue, Instant::now()) {
                    Ok(mut message) => {
                        state.next_tag += 1;
                        let tag = state.next_tag;
                        drop(state);

                        message.attempts += 1;
                        let delivery = Delivery {
                            tag,
                            queue: self.queue.clone(),
                            message_id: message.message_id.clone(),
                            body: message.body.clone(),
                            attempts: message.attempts,
                        };
                        self.unacked.insert(tag, message);
                        return Ok(delivery);
                    }
                    Err(wait_until) => wait_until,
                }
            };

            match wait_until {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<()> {
        self.take_unacked(delivery)?;
        Ok(())
    }

    async fn reject(&mut self, delivery: &Delivery, requeue: bool) -> Result<()> {
        let mut message = self.take_unacked(delivery)?;

        if requeue {
            message.available_at = Instant::now();
            self.inner.lock().insert(&self.queue, message);
        } else {
            let placements = self.inner.topology.dead_letter_route(&self.queue);
            if placements.is_empty() {
                tracing::warn!(
                    queue = %self.queue,
                    message_id = %message.message_id,
                    "Rejected message has no dead-letter route, dropping"
                );
                return Ok(());
            }
            self.inner
                .lock()
                .place(&placements, &message.message_id, &message.body);
        }

        self.inner.notify.notify_waiters();
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if self.unacked.is_empty() {
            return;
        }
        let now = Instant::now();
        {
            let mut state = self.inner.lock();
            for (_, mut message) in self.unacked.drain() {
                message.available_at = now;
                state.insert(&self.queue, message);
            }
        }
        self.inner.notify.notify_waiters();
    }
}

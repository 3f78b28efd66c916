//! Consumer worker pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, Delivery, Subscription};
use crate::error::Result;

const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What to do with a delivery once its handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Reject { requeue: bool },
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Reject { requeue: true } => "requeue",
            Disposition::Reject { requeue: false } => "reject",
        }
    }
}

/// Handles messages from one queue.
///
/// Handlers never fail: every outcome, including a message that cannot be
/// decoded, maps to a [`Disposition`].
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    async fn handle(&self, delivery: &Delivery) -> Disposition;
}

/// A fixed number of consumers on one queue, all sharing a handler.
///
/// Each worker holds its own subscription and processes one message at a
/// time. [`WorkerPool::shutdown`] lets in-flight messages finish before the
/// workers exit.
pub struct WorkerPool {
    queue: String,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Subscribes `workers` consumers to `queue` and starts them.
    pub async fn spawn<B, H>(
        broker: Arc<B>,
        queue: &str,
        workers: usize,
        handler: Arc<H>,
    ) -> Result<Self>
    where
        B: Broker + ?Sized,
        H: MessageHandler + 'static,
    {
        let shutdown = CancellationToken::new();

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let subscription = broker.subscribe(queue).await?;
            handles.push(tokio::spawn(run_worker(
                worker_id,
                queue.to_string(),
                subscription,
                Arc::clone(&handler),
                shutdown.child_token(),
            )));
        }

        tracing::info!(queue, workers, handler = handler.name(), "Worker pool started");
        Ok(Self {
            queue: queue.to_string(),
            shutdown,
            workers: handles,
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops every worker and waits for them to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(queue = %self.queue, error = %e, "Worker task failed");
            }
        }
        tracing::info!(queue = %self.queue, "Worker pool stopped");
    }
}

async fn run_worker<H: MessageHandler>(
    worker_id: usize,
    queue: String,
    mut subscription: Box<dyn Subscription>,
    handler: Arc<H>,
    shutdown: CancellationToken,
) {
    tracing::debug!(%queue, worker_id, "Worker started");

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = subscription.next() => next,
        };

        let delivery = match next {
            Ok(delivery) => delivery,
            Err(e) => {
                tracing::warn!(%queue, worker_id, error = %e, "Failed to receive message");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
                continue;
            }
        };

        let disposition = handler.handle(&delivery).await;
        metrics::counter!(
            "broker_messages_handled",
            "queue" => queue.clone(),
            "disposition" => disposition.as_str()
        )
        .increment(1);

        let settled = match disposition {
            Disposition::Ack => subscription.ack(&delivery).await,
            Disposition::Reject { requeue } => subscription.reject(&delivery, requeue).await,
        };
        if let Err(e) = settled {
            tracing::error!(
                %queue,
                worker_id,
                message_id = %delivery.message_id,
                error = %e,
                "Failed to settle message"
            );
        }
    }

    tracing::debug!(%queue, worker_id, "Worker stopped");
}

//! PostgreSQL-backed broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::error::{BrokerError, Result};
use crate::topology::{Placement, Topology};

use super::{Broker, Delivery, OutboundMessage, Subscription};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_LEASE: Duration = Duration::from_secs(60);

/// Broker whose queues are rows in `broker_messages`.
///
/// A consumer leases one row at a time with `FOR UPDATE SKIP LOCKED`, so
/// any number of workers across processes can share a queue. A lease that
/// is neither acked nor rejected expires and the message is delivered
/// again.
#[derive(Clone)]
pub struct PostgresBroker {
    pool: PgPool,
    topology: Arc<Topology>,
    poll_interval: Duration,
    lease: Duration,
}

impl PostgresBroker {
    pub fn new(pool: PgPool, topology: Topology) -> Self {
        Self {
            pool,
            topology: Arc::new(topology),
            poll_interval: DEFAULT_POLL_INTERVAL,
            lease: DEFAULT_LEASE,
        }
    }

    /// How long an idle consumer sleeps between polls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// How long a delivered message stays invisible to other consumers.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Number of messages stored for a queue, leased and delayed ones
    /// included.
    pub async fn depth(&self, queue: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS depth FROM broker_messages WHERE queue = $1")
            .bind(queue)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("depth")?)
    }
}

async fn insert_placements(
    tx: &mut Transaction<'_, Postgres>,
    placements: &[Placement],
    message_id: &str,
    body: &[u8],
) -> Result<()> {
    for placement in placements {
        sqlx::query(
            r#"
            INSERT INTO broker_messages (queue, message_id, body, available_at)
            VALUES ($1, $2, $3, NOW() + make_interval(secs => $4))
            "#,
        )
        .bind(&placement.queue)
        .bind(message_id)
        .bind(body)
        .bind(placement.delay.as_secs_f64())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl Broker for PostgresBroker {
    #[tracing::instrument(skip(self, message), fields(message_id = %message.message_id))]
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<()> {
        let placements = self.topology.route(exchange, routing_key)?;

        let mut tx = self.pool.begin().await?;
        insert_placements(&mut tx, &placements, &message.message_id, &message.body).await?;
        tx.commit().await?;

        tracing::debug!("Message published");
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>> {
        self.topology.consumable_queue(queue)?;
        Ok(Box::new(PgSubscription {
            pool: self.pool.clone(),
            topology: Arc::clone(&self.topology),
            queue: queue.to_string(),
            owner: Uuid::new_v4(),
            poll_interval: self.poll_interval,
            lease: self.lease,
        }))
    }
}

struct PgSubscription {
    pool: PgPool,
    topology: Arc<Topology>,
    queue: String,
    owner: Uuid,
    poll_interval: Duration,
    lease: Duration,
}

impl PgSubscription {
    async fn try_lease(&self) -> Result<Option<Delivery>> {
        let row = sqlx::query(
            r#"
            UPDATE broker_messages
            SET leased_until = NOW() + make_interval(secs => $3),
                lease_owner = $2,
                attempts = attempts + 1
            WHERE id = (
                SELECT id FROM broker_messages
                WHERE queue = $1
                  AND available_at <= NOW()
                  AND (leased_until IS NULL OR leased_until < NOW())
                ORDER BY available_at, id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, message_id, body, attempts
            "#,
        )
        .bind(&self.queue)
        .bind(self.owner)
        .bind(self.lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| self.row_to_delivery(&row)).transpose()
    }

    fn row_to_delivery(&self, row: &PgRow) -> Result<Delivery> {
        let id: i64 = row.try_get("id")?;
        let attempts: i32 = row.try_get("attempts")?;
        Ok(Delivery {
            tag: id as u64,
            queue: self.queue.clone(),
            message_id: row.try_get("message_id")?,
            body: row.try_get("body")?,
            attempts: attempts.max(0) as u32,
        })
    }
}

#[async_trait]
impl Subscription for PgSubscription {
    async fn next(&mut self) -> Result<Delivery> {
        loop {
            if let Some(delivery) = self.try_lease().await? {
                return Ok(delivery);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<()> {
        let result = sqlx::query("DELETE FROM broker_messages WHERE id = $1 AND lease_owner = $2")
            .bind(delivery.tag as i64)
            .bind(self.owner)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BrokerError::UnknownDelivery(delivery.tag));
        }
        Ok(())
    }

    async fn reject(&mut self, delivery: &Delivery, requeue: bool) -> Result<()> {
        if requeue {
            let result = sqlx::query(
                r#"
                UPDATE broker_messages
                SET leased_until = NULL, lease_owner = NULL
                WHERE id = $1 AND lease_owner = $2
                "#,
            )
            .bind(delivery.tag as i64)
            .bind(self.owner)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(BrokerError::UnknownDelivery(delivery.tag));
            }
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM broker_messages WHERE id = $1 AND lease_owner = $2")
            .bind(delivery.tag as i64)
            .bind(self.owner)
            .execute(&mut *tx)
            .await?;
        if removed.rows_affected() == 0 {
            return Err(BrokerError::UnknownDelivery(delivery.tag));
        }

        let placements = self.topology.dead_letter_route(&self.queue);
        if placements.is_empty() {
            tracing::warn!(
                queue = %self.queue,
                message_id = %delivery.message_id,
                "Rejected message has no dead-letter route, dropping"
            );
        }
        insert_placements(&mut tx, &placements, &delivery.message_id, &delivery.body).await?;

        tx.commit().await?;
        Ok(())
    }
}

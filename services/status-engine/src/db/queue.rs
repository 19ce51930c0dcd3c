//! Postgres-backed message queue.
//!
//! Receiving claims rows with `FOR UPDATE SKIP LOCKED`, pushes their
//! visibility into the future and stamps a fresh receipt. Rows whose
//! visibility lapses without an ack become receivable again.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    postgres::{PgPool, PgRow},
    Row,
};
use uuid::Uuid;

use crate::consumer::{MessageQueue, ReceivedMessage};
use crate::store::{StoreError, StoreResult};

/// [`MessageQueue`] over the `queue_messages` table.
#[derive(Clone)]
pub struct PgMessageQueue {
    pool: PgPool,
    visibility_timeout: Duration,
}

impl PgMessageQueue {
    pub fn new(pool: PgPool, visibility_timeout: Duration) -> Self {
        Self {
            pool,
            visibility_timeout,
        }
    }
}

fn parse_receipt(receipt: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(receipt)
        .map_err(|e| StoreError::Unavailable(format!("invalid queue receipt '{receipt}': {e}")))
}

#[async_trait]
impl MessageQueue for PgMessageQueue {
    async fn send(&self, body: &[u8]) -> StoreResult<()> {
        sqlx::query("INSERT INTO queue_messages (body) VALUES ($1)")
            .bind(body)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn receive(&self, max: usize) -> StoreResult<Vec<ReceivedMessage>> {
        let limit = i64::try_from(max).unwrap_or(i64::MAX);
        let visibility_secs = self.visibility_timeout.as_secs_f64();

        let rows = sqlx::query(
            r#"
            UPDATE queue_messages
            SET visible_at = now() + make_interval(secs => $2),
                receive_count = receive_count + 1,
                receipt = gen_random_uuid()
            WHERE id IN (
                SELECT id
                FROM queue_messages
                WHERE visible_at <= now()
                ORDER BY id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, body, receipt, receive_count
            "#,
        )
        .bind(limit)
        .bind(visibility_secs)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .iter()
            .map(|row: &PgRow| {
                let id: i64 = row.try_get("id")?;
                let receipt: Uuid = row.try_get("receipt")?;
                let receive_count: i32 = row.try_get("receive_count")?;
                Ok((
                    id,
                    ReceivedMessage {
                        receipt: receipt.to_string(),
                        body: row.try_get("body")?,
                        delivery_count: u32::try_from(receive_count).unwrap_or(0),
                    },
                ))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        // RETURNING order is unspecified.
        messages.sort_by_key(|(id, _)| *id);
        Ok(messages.into_iter().map(|(_, message)| message).collect())
    }

    async fn ack(&self, receipt: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM queue_messages WHERE receipt = $1")
            .bind(parse_receipt(receipt)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, receipt: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE queue_messages
            SET visible_at = now(), receipt = NULL
            WHERE receipt = $1
            "#,
        )
        .bind(parse_receipt(receipt)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

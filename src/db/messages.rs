//! Message queue log, consumer group offsets and in-flight leases.
//!
//! Messages are appended to `mq_messages` and never rewritten. Each consumer
//! group keeps a claim cursor per queue in `mq_group_offsets`. Claiming a
//! batch advances the cursor and records the claimed id range in
//! `mq_inflight`; committing the batch deletes that lease. A lease older than
//! the lease timeout belongs to a dead worker and is handed out again.
//!
//! SQLite serializes writers, so message ids become visible in increasing
//! order and a cursor never skips a message committed later.
//!
//! Errors here stay as [`Error::Sqlx`] so callers can tell lock contention
//! apart from permanent failures.

use crate::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use std::time::Duration;

use super::Database;

/// One queued message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Position in the log
    pub id: i64,
    /// Opaque payload
    pub payload: Vec<u8>,
}

impl<'r> FromRow<'r, SqliteRow> for QueueMessage {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(QueueMessage {
            id: row.try_get("id")?,
            payload: row.try_get("payload")?,
        })
    }
}

/// Messages claimed by one consumer, held under a lease until committed
#[derive(Debug, Clone)]
pub struct ClaimedBatch {
    /// Lease row to delete on commit
    pub lease_id: i64,
    /// Claim time written into the lease (unix millis)
    pub claimed_at: i64,
    /// Claimed messages in log order
    pub messages: Vec<QueueMessage>,
    /// The lease had expired and this batch is being delivered again
    pub redelivered: bool,
}

impl Database {
    /// Append a message inside the caller's transaction
    pub async fn enqueue_message(
        conn: &mut SqliteConnection,
        queue: &str,
        payload: &[u8],
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp_millis();

        let result =
            sqlx::query("INSERT INTO mq_messages (queue, payload, created_at) VALUES (?, ?, ?)")
                .bind(queue)
                .bind(payload)
                .bind(now)
                .execute(&mut *conn)
                .await?;

        Ok(result.last_insert_rowid())
    }

    /// Claim the next batch of `queue` for `group`
    ///
    /// Expired leases are redelivered before new messages. Returns `None` when
    /// there is nothing to deliver.
    pub async fn claim_message_batch(
        &self,
        group: &str,
        queue: &str,
        batch_size: u32,
        lease_timeout: Duration,
    ) -> Result<Option<ClaimedBatch>> {
        let now = chrono::Utc::now().timestamp_millis();
        let expired_before = now.saturating_sub(lease_timeout.as_millis() as i64);

        let mut tx = self.pool.begin().await?;

        // Write first: takes the database write lock before any read
        let offset: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO mq_group_offsets (group_id, queue, claimed_offset)
            VALUES (?, ?, 0)
            ON CONFLICT (group_id, queue) DO UPDATE SET claimed_offset = claimed_offset
            RETURNING claimed_offset
            "#,
        )
        .bind(group)
        .bind(queue)
        .fetch_one(&mut *tx)
        .await?;

        let expired: Option<(i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT id, first_id, last_id FROM mq_inflight
            WHERE group_id = ? AND queue = ? AND claimed_at <= ?
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(group)
        .bind(queue)
        .bind(expired_before)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((lease_id, first_id, last_id)) = expired {
            sqlx::query("UPDATE mq_inflight SET claimed_at = ? WHERE id = ?")
                .bind(now)
                .bind(lease_id)
                .execute(&mut *tx)
                .await?;

            let messages = sqlx::query_as::<_, QueueMessage>(
                "SELECT id, payload FROM mq_messages WHERE queue = ? AND id BETWEEN ? AND ? ORDER BY id",
            )
            .bind(queue)
            .bind(first_id)
            .bind(last_id)
            .fetch_all(&mut *tx)
            .await?;

            tx.commit().await?;

            return Ok(Some(ClaimedBatch {
                lease_id,
                claimed_at: now,
                messages,
                redelivered: true,
            }));
        }

        let messages = sqlx::query_as::<_, QueueMessage>(
            "SELECT id, payload FROM mq_messages WHERE queue = ? AND id > ? ORDER BY id LIMIT ?",
        )
        .bind(queue)
        .bind(offset)
        .bind(i64::from(batch_size))
        .fetch_all(&mut *tx)
        .await?;

        let (first_id, last_id) = match (messages.first(), messages.last()) {
            (Some(first), Some(last)) => (first.id, last.id),
            _ => {
                tx.commit().await?;
                return Ok(None);
            }
        };

        sqlx::query("UPDATE mq_group_offsets SET claimed_offset = ? WHERE group_id = ? AND queue = ?")
            .bind(last_id)
            .bind(group)
            .bind(queue)
            .execute(&mut *tx)
            .await?;

        let lease = sqlx::query(
            r#"
            INSERT INTO mq_inflight (group_id, queue, first_id, last_id, claimed_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(group)
        .bind(queue)
        .bind(first_id)
        .bind(last_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(ClaimedBatch {
            lease_id: lease.last_insert_rowid(),
            claimed_at: now,
            messages,
            redelivered: false,
        }))
    }

    /// Commit a claimed batch by dropping its lease
    ///
    /// Returns `false` when the lease was handed to another worker after
    /// this claim expired; that worker now owns the commit.
    pub async fn release_message_batch(&self, batch: &ClaimedBatch) -> Result<bool> {
        let result = sqlx::query("DELETE FROM mq_inflight WHERE id = ? AND claimed_at = ?")
            .bind(batch.lease_id)
            .bind(batch.claimed_at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Messages of `queue` that `group` has not claimed yet
    pub async fn queue_lag(&self, group: &str, queue: &str) -> Result<u64> {
        let lag: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM mq_messages
            WHERE queue = ?
              AND id > COALESCE(
                  (SELECT claimed_offset FROM mq_group_offsets WHERE group_id = ? AND queue = ?),
                  0)
            "#,
        )
        .bind(queue)
        .bind(group)
        .bind(queue)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(lag as u64)
    }

    /// Leases currently held by `group` on `queue`
    pub async fn count_inflight_batches(&self, group: &str, queue: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM mq_inflight WHERE group_id = ? AND queue = ?")
                .bind(group)
                .bind(queue)
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }
}

use crate::config::MqConfig;
use crate::db::Database;
use crate::retry::{RetryPolicy, with_retry};
use crate::Result;
use serde::Serialize;
use sqlx::SqliteConnection;

/// Publishes messages
#[derive(Clone)]
pub struct MessageQueue {
    db: Database,
    retry: RetryPolicy,
}

impl MessageQueue {
    /// Create a producer; transient failures are retried once after
    /// `config.produce_retry_delay`
    pub fn new(db: Database, config: &MqConfig) -> Self {
        Self {
            db,
            retry: RetryPolicy::once_after(config.produce_retry_delay),
        }
    }

    /// Append a message and return its id once it is durable
    pub async fn produce(&self, queue: &str, payload: &[u8]) -> Result<i64> {
        let pool = self.db.pool();
        let id = with_retry(&self.retry, move || async move {
            let mut conn = pool.acquire().await?;
            Database::enqueue_message(&mut conn, queue, payload).await
        })
        .await?;

        tracing::debug!(queue, message_id = id, "message produced");
        Ok(id)
    }

    /// Serialize `event` as JSON and produce it
    pub async fn produce_json<T: Serialize>(&self, queue: &str, event: &T) -> Result<i64> {
        let payload = serde_json::to_vec(event)?;
        self.produce(queue, &payload).await
    }

    /// Append a message inside the caller's transaction
    ///
    /// The message becomes visible to consumers only when that transaction
    /// commits, and disappears with it on rollback.
    pub async fn produce_in<T: Serialize>(
        conn: &mut SqliteConnection,
        queue: &str,
        event: &T,
    ) -> Result<i64> {
        let payload = serde_json::to_vec(event)?;
        Database::enqueue_message(conn, queue, &payload).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::create_test_db;
    use crate::types::{DOWNLOAD_TASK_CREATED_QUEUE, DownloadTaskCreated, DownloadTaskId};

    #[tokio::test]
    async fn produced_messages_are_visible_immediately() {
        let (db, _dir) = create_test_db().await;
        let mq = MessageQueue::new(db.clone(), &MqConfig::default());

        let first = mq.produce("q", b"one").await.unwrap();
        let second = mq.produce("q", b"two").await.unwrap();
        assert!(second > first);

        assert_eq!(db.queue_lag("group", "q").await.unwrap(), 2);
        assert_eq!(db.queue_lag("group", "other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn produce_in_follows_the_transaction() {
        let (db, _dir) = create_test_db().await;
        let event = DownloadTaskCreated {
            id: DownloadTaskId(7),
        };

        let mut tx = db.begin().await.unwrap();
        MessageQueue::produce_in(&mut tx, DOWNLOAD_TASK_CREATED_QUEUE, &event)
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(
            db.queue_lag("g", DOWNLOAD_TASK_CREATED_QUEUE).await.unwrap(),
            0
        );

        let mut tx = db.begin().await.unwrap();
        MessageQueue::produce_in(&mut tx, DOWNLOAD_TASK_CREATED_QUEUE, &event)
            .await
            .unwrap();
        Database::commit(tx).await.unwrap();

        let batch = db
            .claim_message_batch(
                "g",
                DOWNLOAD_TASK_CREATED_QUEUE,
                10,
                std::time::Duration::from_secs(60),
            )
            .await
            .unwrap()
            .unwrap();
        let decoded: DownloadTaskCreated =
            serde_json::from_slice(&batch.messages[0].payload).unwrap();
        assert_eq!(decoded, event);
    }

    #[tokio::test]
    async fn produce_fails_on_closed_pool() {
        let (db, _dir) = create_test_db().await;
        let mq = MessageQueue::new(
            db.clone(),
            &MqConfig {
                produce_retry_delay: std::time::Duration::from_millis(1),
                ..MqConfig::default()
            },
        );
        db.close().await;

        assert!(mq.produce("q", b"lost").await.is_err());
    }
}

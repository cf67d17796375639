//! Download task CRUD operations and row locking.

use crate::error::DatabaseError;
use crate::types::{AccountId, DownloadStatus, DownloadTask, DownloadTaskId, metadata_keys};
use crate::{Error, Result};
use sqlx::SqliteConnection;
use std::collections::BTreeMap;

use super::{DOWNLOAD_TASK_COLUMNS, Database, NewDownloadTask, query_failed};

impl Database {
    /// Insert a new Pending task inside the caller's transaction
    pub async fn insert_download_task(
        conn: &mut SqliteConnection,
        task: &NewDownloadTask,
    ) -> Result<DownloadTaskId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO download_tasks (
                owner_account_id, download_type, url, status, metadata,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, '{}', ?, ?)
            "#,
        )
        .bind(task.owner_account_id)
        .bind(task.download_type.to_i32())
        .bind(&task.url)
        .bind(DownloadStatus::Pending.to_i32())
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| query_failed("Failed to insert download task", e))?;

        Ok(DownloadTaskId(result.last_insert_rowid()))
    }

    /// Lock a task row for the rest of the caller's transaction
    ///
    /// SQLite has no `SELECT ... FOR UPDATE`; a no-op `UPDATE ... RETURNING`
    /// takes the database write lock instead. It must be the first statement
    /// of the transaction so a concurrent locker waits on the busy timeout
    /// rather than failing with a stale snapshot.
    pub async fn lock_download_task(
        conn: &mut SqliteConnection,
        id: DownloadTaskId,
    ) -> Result<Option<DownloadTask>> {
        let query =
            format!("UPDATE download_tasks SET id = id WHERE id = ? RETURNING {DOWNLOAD_TASK_COLUMNS}");

        sqlx::query_as::<_, DownloadTask>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to lock download task: {}",
                    e
                )))
            })
    }

    /// Set a locked task's status
    pub async fn set_download_task_status(
        conn: &mut SqliteConnection,
        id: DownloadTaskId,
        status: DownloadStatus,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query("UPDATE download_tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.to_i32())
            .bind(now)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update download task status: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Replace a locked task's URL
    pub async fn set_download_task_url(
        conn: &mut SqliteConnection,
        id: DownloadTaskId,
        url: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query("UPDATE download_tasks SET url = ?, updated_at = ? WHERE id = ?")
            .bind(url)
            .bind(now)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update download task url: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Delete a locked task
    pub async fn remove_download_task(conn: &mut SqliteConnection, id: DownloadTaskId) -> Result<()> {
        sqlx::query("DELETE FROM download_tasks WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete download task: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Move a Downloading task to its terminal status
    ///
    /// Only applies while the task is still Downloading. Returns whether a row
    /// changed.
    pub async fn complete_download_task(
        &self,
        id: DownloadTaskId,
        status: DownloadStatus,
        metadata: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let metadata = serde_json::to_string(metadata)?;

        let result = sqlx::query(
            r#"
            UPDATE download_tasks
            SET status = ?, metadata = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(status.to_i32())
        .bind(metadata)
        .bind(now)
        .bind(id)
        .bind(DownloadStatus::Downloading.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to complete download task", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Refresh `updated_at` of a task that is still Downloading
    ///
    /// Running transfers call this periodically so they never look stale.
    /// Returns `false` once the task has left Downloading.
    pub async fn touch_download_task(&self, id: DownloadTaskId) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result =
            sqlx::query("UPDATE download_tasks SET updated_at = ? WHERE id = ? AND status = ?")
                .bind(now)
                .bind(id)
                .bind(DownloadStatus::Downloading.to_i32())
                .execute(&self.pool)
                .await
                .map_err(|e| query_failed("Failed to refresh download task", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Get a download task by ID
    pub async fn get_download_task(&self, id: DownloadTaskId) -> Result<Option<DownloadTask>> {
        let query = format!("SELECT {DOWNLOAD_TASK_COLUMNS} FROM download_tasks WHERE id = ?");

        sqlx::query_as::<_, DownloadTask>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get download task: {}",
                    e
                )))
            })
    }

    /// List one page of an account's tasks, ordered by id
    pub async fn list_download_tasks_by_owner(
        &self,
        owner: AccountId,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<DownloadTask>> {
        let query = format!(
            "SELECT {DOWNLOAD_TASK_COLUMNS} FROM download_tasks \
             WHERE owner_account_id = ? ORDER BY id ASC LIMIT ? OFFSET ?"
        );

        sqlx::query_as::<_, DownloadTask>(&query)
            .bind(owner)
            .bind(i64::from(limit))
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list download tasks: {}",
                    e
                )))
            })
    }

    /// Count every task owned by an account
    pub async fn count_download_tasks_by_owner(&self, owner: AccountId) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM download_tasks WHERE owner_account_id = ?")
                .bind(owner)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to count download tasks: {}",
                        e
                    )))
                })?;

        Ok(count as u64)
    }

    /// Fail tasks stuck in Downloading since before `cutoff` (unix seconds)
    ///
    /// Returns the number of tasks moved to Failed.
    pub async fn fail_stale_download_tasks(&self, cutoff: i64, reason: &str) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let path = format!("$.\"{}\"", metadata_keys::ERROR);

        let result = sqlx::query(
            r#"
            UPDATE download_tasks
            SET status = ?, metadata = json_set(metadata, ?, ?), updated_at = ?
            WHERE status = ? AND updated_at < ?
            "#,
        )
        .bind(DownloadStatus::Failed.to_i32())
        .bind(path)
        .bind(reason)
        .bind(now)
        .bind(DownloadStatus::Downloading.to_i32())
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to fail stale download tasks: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }
}

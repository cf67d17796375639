//! Database layer for dlhub
//!
//! Handles SQLite persistence for accounts, credentials, download tasks,
//! token public keys and the message queue log.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`accounts`] — Accounts and their credentials
//! - [`download_tasks`] — Download task CRUD and row locking
//! - [`token_keys`] — Public halves of token signing keys
//! - [`messages`] — Queue log, consumer group offsets and in-flight leases
//!
//! Operations that must share a transaction with other writes take a
//! `&mut SqliteConnection` instead of `&self`; pass `&mut *tx`.

use crate::error::{DatabaseError, Error};
use crate::retry::IsRetryable;
use crate::types::{
    Account, AccountId, DownloadStatus, DownloadTask, DownloadTaskId, DownloadType,
};
use chrono::{TimeZone, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{FromRow, Row};
use std::collections::BTreeMap;

mod accounts;
mod download_tasks;
mod messages;
mod migrations;
mod token_keys;

pub use messages::{ClaimedBatch, QueueMessage};

/// New download task to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewDownloadTask {
    /// Owning account
    pub owner_account_id: AccountId,
    /// How the URL is fetched
    pub download_type: DownloadType,
    /// Source URL
    pub url: String,
}

/// Database handle for dlhub
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Column list shared by every download task query
pub(crate) const DOWNLOAD_TASK_COLUMNS: &str =
    "id, owner_account_id, download_type, url, status, metadata, created_at, updated_at";

impl<'r> FromRow<'r, SqliteRow> for DownloadTask {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let metadata: String = row.try_get("metadata")?;
        let metadata: BTreeMap<String, String> =
            serde_json::from_str(&metadata).map_err(|e| sqlx::Error::ColumnDecode {
                index: "metadata".to_string(),
                source: Box::new(e),
            })?;

        Ok(DownloadTask {
            id: row.try_get::<DownloadTaskId, _>("id")?,
            owner_account_id: row.try_get::<AccountId, _>("owner_account_id")?,
            download_type: DownloadType::from_i32(row.try_get("download_type")?),
            url: row.try_get("url")?,
            status: DownloadStatus::from_i32(row.try_get("status")?),
            metadata,
            created_at: timestamp(row.try_get("created_at")?),
            updated_at: timestamp(row.try_get("updated_at")?),
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for Account {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Account {
            id: row.try_get::<AccountId, _>("id")?,
            name: row.try_get("name")?,
        })
    }
}

fn timestamp(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// Stringify a failed query, keeping lock contention recognizable as
/// [`DatabaseError::Busy`] so writers can retry it
pub(crate) fn query_failed(context: &str, e: sqlx::Error) -> Error {
    let message = format!("{context}: {e}");
    if e.is_retryable() {
        Error::Database(DatabaseError::Busy(message))
    } else {
        Error::Database(DatabaseError::QueryFailed(message))
    }
}

/// True when a failed write hit a UNIQUE constraint
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

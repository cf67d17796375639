//! Download task lifecycle
//!
//! Tasks are created `Pending` together with a [`DownloadTaskCreated`] event
//! in one transaction. Execution moves a task `Pending -> Downloading` under a
//! row lock, so duplicate or concurrent deliveries of the same event collapse
//! into one transfer. The transfer runs outside the lock and always ends in
//! `Success` or `Failed`.
//!
//! Every caller-facing operation takes a session token; tasks owned by
//! another account are reported as not found.

use crate::auth::TokenManager;
use crate::config::Config;
use crate::db::{Database, NewDownloadTask};
use crate::error::DownloadTaskError;
use crate::mq::MessageQueue;
use crate::retry::{RetryPolicy, with_retry};
use crate::storage::ObjectStorage;
use crate::types::{
    AccountId, DOWNLOAD_TASK_CREATED_QUEUE, DownloadStatus, DownloadTask, DownloadTaskCreated,
    DownloadTaskId, DownloadTaskPage, DownloadType, metadata_keys,
};
use crate::{Error, Result};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::io::ReaderStream;

mod downloader;
mod execute;

pub use downloader::{Downloader, Downloaders, HttpDownloader};

/// Page size used when a list request asks for 0 tasks
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Largest accepted page size
pub const MAX_PAGE_SIZE: u32 = 100;

/// Stored artifact name for a task
pub fn file_name_for(id: DownloadTaskId) -> String {
    format!("download_file_{}", id.get())
}

/// Artifact of a successful task
pub struct DownloadTaskFile {
    /// Stored `Content-Type`
    pub content_type: String,
    /// Artifact name in storage
    pub file_name: String,
    /// Size in bytes, when recorded
    pub size: Option<u64>,
    /// Body in chunks of at most `api.file_chunk_size` bytes
    pub stream: BoxStream<'static, std::io::Result<Bytes>>,
}

/// Creates, executes and manages download tasks
#[derive(Clone)]
pub struct DownloadTaskManager {
    db: Database,
    tokens: Arc<TokenManager>,
    storage: Arc<dyn ObjectStorage>,
    downloaders: Arc<Downloaders>,
    file_chunk_size: usize,
    heartbeat_interval: Duration,
    stale_after: Duration,
    /// Creation and terminal status writes get one retry on lock contention
    write_retry: RetryPolicy,
    accepting_new: Arc<AtomicBool>,
}

impl DownloadTaskManager {
    /// Create a task manager
    pub fn new(
        db: Database,
        tokens: Arc<TokenManager>,
        storage: Arc<dyn ObjectStorage>,
        config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            db,
            tokens,
            storage,
            downloaders: Arc::new(Downloaders::new(&config.download)?),
            file_chunk_size: config.api.file_chunk_size,
            heartbeat_interval: config.download.heartbeat_interval,
            stale_after: config.download.stale_downloading_after,
            write_retry: RetryPolicy::once_after(config.mq.produce_retry_delay),
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Reject further [`create_download_task`](Self::create_download_task) calls
    /// with [`Error::ShuttingDown`]
    pub(crate) fn stop_accepting(&self) {
        self.accepting_new.store(false, Ordering::SeqCst);
    }

    /// Register `url` for download and publish [`DownloadTaskCreated`]
    ///
    /// The task row and the event commit together or not at all. A busy
    /// database gets one retry of the whole transaction.
    pub async fn create_download_task(
        &self,
        token: &str,
        url: &str,
        download_type: DownloadType,
    ) -> Result<DownloadTask> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let owner = self.authenticate(token).await?;
        if self.db.get_account(owner).await?.is_none() {
            return Err(Error::NotFound(format!("account {owner}")));
        }
        let new_task = NewDownloadTask {
            owner_account_id: owner,
            download_type,
            url: validate_url(url)?,
        };

        let db = &self.db;
        let new_task = &new_task;
        let id = with_retry(&self.write_retry, move || async move {
            let mut tx = db.begin().await?;
            let id = Database::insert_download_task(&mut tx, new_task).await?;
            MessageQueue::produce_in(
                &mut tx,
                DOWNLOAD_TASK_CREATED_QUEUE,
                &DownloadTaskCreated { id },
            )
            .await?;
            Database::commit(tx).await?;
            Ok::<_, Error>(id)
        })
        .await?;

        tracing::info!(task_id = %id, account_id = %owner, "download task created");

        self.db
            .get_download_task(id)
            .await?
            .ok_or_else(|| DownloadTaskError::NotFound { id: id.get() }.into())
    }

    /// Page through the caller's tasks, ordered by id
    ///
    /// `limit` 0 means [`DEFAULT_PAGE_SIZE`]; larger values are capped at
    /// [`MAX_PAGE_SIZE`]. `total` counts all of the caller's tasks.
    pub async fn get_download_task_list(
        &self,
        token: &str,
        limit: u32,
        offset: u64,
    ) -> Result<DownloadTaskPage> {
        let owner = self.authenticate(token).await?;
        let limit = clamp_page_size(limit);

        let tasks = self
            .db
            .list_download_tasks_by_owner(owner, limit, offset)
            .await?;
        let total = self.db.count_download_tasks_by_owner(owner).await?;

        Ok(DownloadTaskPage { tasks, total })
    }

    /// One of the caller's tasks
    pub async fn get_download_task(&self, token: &str, id: DownloadTaskId) -> Result<DownloadTask> {
        let owner = self.authenticate(token).await?;
        self.owned_task(owner, id).await
    }

    /// Stream the artifact of a successful task
    pub async fn get_download_task_file(
        &self,
        token: &str,
        id: DownloadTaskId,
    ) -> Result<DownloadTaskFile> {
        let owner = self.authenticate(token).await?;
        let task = self.owned_task(owner, id).await?;

        if task.status != DownloadStatus::Success {
            return Err(invalid_state(&task, "download the file of"));
        }

        let file_name = task
            .metadata
            .get(metadata_keys::FILE_NAME)
            .cloned()
            .unwrap_or_else(|| file_name_for(id));
        let reader = self.storage.reader(&file_name).await?;

        Ok(DownloadTaskFile {
            content_type: task
                .metadata
                .get(metadata_keys::CONTENT_TYPE)
                .cloned()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size: task
                .metadata
                .get(metadata_keys::SIZE)
                .and_then(|size| size.parse().ok()),
            file_name,
            stream: ReaderStream::with_capacity(reader, self.file_chunk_size).boxed(),
        })
    }

    /// Change the URL of a task that has not started
    pub async fn update_download_task(
        &self,
        token: &str,
        id: DownloadTaskId,
        url: &str,
    ) -> Result<DownloadTask> {
        let owner = self.authenticate(token).await?;
        let url = validate_url(url)?;

        let mut tx = self.db.begin().await?;
        let task = Self::lock_owned_task(&mut tx, owner, id).await?;
        if task.status != DownloadStatus::Pending {
            return Err(invalid_state(&task, "update"));
        }
        Database::set_download_task_url(&mut tx, id, &url).await?;
        Database::commit(tx).await?;

        tracing::info!(task_id = %id, "download task url updated");
        self.owned_task(owner, id).await
    }

    /// Delete a task that is not downloading
    ///
    /// The stored artifact, if any, is left in place.
    pub async fn delete_download_task(&self, token: &str, id: DownloadTaskId) -> Result<()> {
        let owner = self.authenticate(token).await?;

        let mut tx = self.db.begin().await?;
        let task = Self::lock_owned_task(&mut tx, owner, id).await?;
        if task.status == DownloadStatus::Downloading {
            return Err(invalid_state(&task, "delete"));
        }
        Database::remove_download_task(&mut tx, id).await?;
        Database::commit(tx).await?;

        tracing::info!(task_id = %id, "download task deleted");
        Ok(())
    }

    /// Fail `Downloading` tasks whose heartbeat stopped more than
    /// `download.stale_downloading_after` ago
    ///
    /// Running transfers refresh their task every
    /// `download.heartbeat_interval`, on any instance, so only tasks abandoned
    /// by a crashed process match. Never run automatically.
    pub async fn fail_stale_tasks(&self) -> Result<u64> {
        let cutoff = chrono::Utc::now().timestamp() - self.stale_after.as_secs() as i64;
        let failed = self
            .db
            .fail_stale_download_tasks(cutoff, "interrupted before completion")
            .await?;

        if failed > 0 {
            tracing::warn!(failed, "failed stale downloading tasks");
        }
        Ok(failed)
    }

    async fn authenticate(&self, token: &str) -> Result<AccountId> {
        let (account_id, _) = self.tokens.verify(token).await?;
        Ok(account_id)
    }

    async fn owned_task(&self, owner: AccountId, id: DownloadTaskId) -> Result<DownloadTask> {
        match self.db.get_download_task(id).await? {
            Some(task) if task.owner_account_id == owner => Ok(task),
            _ => Err(DownloadTaskError::NotFound { id: id.get() }.into()),
        }
    }

    async fn lock_owned_task(
        conn: &mut sqlx::SqliteConnection,
        owner: AccountId,
        id: DownloadTaskId,
    ) -> Result<DownloadTask> {
        match Database::lock_download_task(conn, id).await? {
            Some(task) if task.owner_account_id == owner => Ok(task),
            _ => Err(DownloadTaskError::NotFound { id: id.get() }.into()),
        }
    }
}

fn clamp_page_size(limit: u32) -> u32 {
    match limit {
        0 => DEFAULT_PAGE_SIZE,
        limit => limit.min(MAX_PAGE_SIZE),
    }
}

/// Tasks need an absolute http(s) URL
fn validate_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let parsed = url::Url::parse(raw)
        .map_err(|e| Error::InvalidArgument(format!("invalid url {raw:?}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" if parsed.has_host() => Ok(raw.to_string()),
        _ => Err(Error::InvalidArgument(format!(
            "url must be an absolute http or https url: {raw:?}"
        ))),
    }
}

fn invalid_state(task: &DownloadTask, operation: &str) -> Error {
    DownloadTaskError::InvalidState {
        id: task.id.get(),
        operation: operation.to_string(),
        current_state: task.status.to_string(),
    }
    .into()
}

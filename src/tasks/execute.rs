//! Task execution.

use super::{DownloadTaskManager, file_name_for, invalid_state};
use crate::db::Database;
use crate::error::DownloadTaskError;
use crate::retry::with_retry;
use crate::types::{DownloadStatus, DownloadTask, DownloadTaskId, metadata_keys};
use crate::Result;
use std::collections::BTreeMap;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

impl DownloadTaskManager {
    /// Run the transfer for task `id`
    ///
    /// A missing task or one that is not `Pending` is a no-op, which makes
    /// redelivered events harmless. Once the task is `Downloading`, every
    /// failure (unsupported type, storage, transfer, cancellation) marks it
    /// `Failed` with an `error` entry in its metadata and is returned.
    ///
    /// While the transfer runs, the task's `updated_at` is refreshed every
    /// `download.heartbeat_interval`.
    pub async fn execute_download_task(
        &self,
        id: DownloadTaskId,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(task) = self.begin_execution(id).await? else {
            return Ok(());
        };

        tracing::info!(task_id = %id, url = %task.url, "download started");

        let result = match self.transfer_with_heartbeat(&task, cancel).await {
            Ok(transfer_metadata) => {
                let mut metadata = task.metadata.clone();
                metadata.extend(transfer_metadata);
                self.finish(&task, DownloadStatus::Success, &metadata).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                tracing::info!(task_id = %id, "download succeeded");
                Ok(())
            }
            Err(e) => {
                tracing::error!(task_id = %id, error = %e, "download failed");

                let mut metadata = task.metadata.clone();
                metadata.insert(metadata_keys::ERROR.to_string(), e.to_string());
                if let Err(update_err) = self.finish(&task, DownloadStatus::Failed, &metadata).await {
                    tracing::error!(task_id = %id, error = %update_err, "failed to mark task failed");
                }
                Err(e)
            }
        }
    }

    /// Record the terminal status of a task this call moved to `Downloading`
    ///
    /// Lock contention gets one retry. A task that already left `Downloading`
    /// is reported as [`DownloadTaskError::InvalidState`].
    pub(super) async fn finish(
        &self,
        task: &DownloadTask,
        status: DownloadStatus,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()> {
        let db = &self.db;
        let id = task.id;
        let updated = with_retry(&self.write_retry, move || {
            db.complete_download_task(id, status, metadata)
        })
        .await?;
        if updated {
            return Ok(());
        }

        tracing::warn!(task_id = %id, %status, "task left downloading state during transfer");
        match self.db.get_download_task(id).await? {
            Some(current) => Err(invalid_state(&current, "complete")),
            None => Err(DownloadTaskError::NotFound { id: id.get() }.into()),
        }
    }

    /// Run [`transfer`](Self::transfer) while refreshing the task's heartbeat
    ///
    /// If the task is failed by someone else meanwhile, the transfer is
    /// cancelled since its result can no longer be recorded.
    async fn transfer_with_heartbeat(
        &self,
        task: &DownloadTask,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>> {
        let transfer_cancel = cancel.child_token();
        let transfer = self.transfer(task, &transfer_cancel);
        tokio::pin!(transfer);

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; begin_execution just wrote updated_at
        heartbeat.tick().await;

        loop {
            tokio::select! {
                result = &mut transfer => return result,
                _ = heartbeat.tick(), if !transfer_cancel.is_cancelled() => {
                    match self.db.touch_download_task(task.id).await {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::warn!(task_id = %task.id, "task left downloading state, cancelling transfer");
                            transfer_cancel.cancel();
                        }
                        Err(e) => {
                            tracing::warn!(task_id = %task.id, error = %e, "failed to refresh task heartbeat");
                        }
                    }
                }
            }
        }
    }

    /// Move a `Pending` task to `Downloading` under the row lock
    async fn begin_execution(&self, id: DownloadTaskId) -> Result<Option<DownloadTask>> {
        let mut tx = self.db.begin().await?;

        let Some(mut task) = Database::lock_download_task(&mut tx, id).await? else {
            tracing::warn!(task_id = %id, "download task not found, skipping");
            tx.rollback().await?;
            return Ok(None);
        };

        if task.status != DownloadStatus::Pending {
            tracing::debug!(task_id = %id, status = %task.status, "download task already handled");
            tx.rollback().await?;
            return Ok(None);
        }

        Database::set_download_task_status(&mut tx, id, DownloadStatus::Downloading).await?;
        Database::commit(tx).await?;

        task.status = DownloadStatus::Downloading;
        Ok(Some(task))
    }

    async fn transfer(
        &self,
        task: &DownloadTask,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>> {
        let downloader = self.downloaders.resolve(task.download_type)?;

        let file_name = file_name_for(task.id);
        let mut writer = self.storage.writer(&file_name).await?;

        match downloader.download(&task.url, &mut writer, cancel).await {
            Ok(mut metadata) => {
                let size = writer.finish().await?;
                metadata.insert(metadata_keys::SIZE.to_string(), size.to_string());
                metadata.insert(metadata_keys::FILE_NAME.to_string(), file_name);
                Ok(metadata)
            }
            Err(e) => {
                writer.abort().await;
                Err(e)
            }
        }
    }
}

//! Polling helpers for asynchronous task execution

use dlhub::{DownloadHub, DownloadStatus, DownloadTask, DownloadTaskId};
use std::time::Duration;

/// Poll a task until it reaches a terminal status (Success or Failed)
///
/// Returns `None` on timeout.
pub async fn wait_for_terminal(
    hub: &DownloadHub,
    token: &str,
    id: DownloadTaskId,
    timeout: Duration,
) -> Option<DownloadTask> {
    tokio::time::timeout(timeout, async {
        loop {
            let task = hub
                .tasks()
                .get_download_task(token, id)
                .await
                .expect("get download task");
            if matches!(task.status, DownloadStatus::Success | DownloadStatus::Failed) {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .ok()
}

/// Poll until the hub's consumer group has claimed every queued event
pub async fn wait_for_drained_queue(hub: &DownloadHub, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, async {
        while hub.queue_lag().await.expect("queue lag") > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}

//! Queue handlers that drive task execution.

use crate::mq::MessageHandler;
use crate::tasks::DownloadTaskManager;
use crate::types::DownloadTaskCreated;
use crate::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Executes the task named by each [`DownloadTaskCreated`] event
pub struct DownloadTaskCreatedHandler {
    tasks: DownloadTaskManager,
}

impl DownloadTaskCreatedHandler {
    /// Create a handler backed by `tasks`
    pub fn new(tasks: DownloadTaskManager) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl MessageHandler for DownloadTaskCreatedHandler {
    async fn handle(&self, payload: &[u8], cancel: &CancellationToken) -> Result<()> {
        let event: DownloadTaskCreated = serde_json::from_slice(payload)?;
        tracing::debug!(task_id = %event.id, "download task created event received");

        self.tasks.execute_download_task(event.id, cancel).await
    }
}

use super::MessageHandler;
use crate::config::MqConfig;
use crate::db::Database;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Collects queue handlers before the consumer starts
pub struct ConsumerBuilder {
    db: Database,
    config: MqConfig,
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl ConsumerBuilder {
    /// Start with no handlers
    pub fn new(db: Database, config: MqConfig) -> Self {
        Self {
            db,
            config,
            handlers: HashMap::new(),
        }
    }

    /// Route messages of `queue` to `handler`, replacing any earlier registration
    pub fn register_handler(
        mut self,
        queue: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        self.handlers.insert(queue.into(), handler);
        self
    }

    /// Freeze the handler map
    pub fn build(self) -> Consumer {
        Consumer {
            db: self.db,
            config: Arc::new(self.config),
            handlers: Arc::new(self.handlers),
        }
    }
}

/// Consumer-group member serving a fixed set of queues
#[derive(Clone)]
pub struct Consumer {
    db: Database,
    config: Arc<MqConfig>,
    handlers: Arc<HashMap<String, Arc<dyn MessageHandler>>>,
}

impl Consumer {
    /// Queues with a registered handler
    pub fn queues(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Spawn one worker per queue
    ///
    /// `shutdown` stops workers between batches; a batch in progress is
    /// finished and committed first. `abort` is passed to handlers so they can
    /// stop early.
    pub fn start(&self, shutdown: CancellationToken, abort: CancellationToken) -> ConsumerHandle {
        let mut workers = JoinSet::new();

        for queue in self.handlers.keys() {
            let consumer = self.clone();
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            let abort = abort.clone();

            workers.spawn(async move {
                consumer.run_worker(&queue, shutdown, abort).await;
            });
        }

        tracing::info!(
            group = %self.config.consumer_group,
            workers = workers.len(),
            "message consumer started"
        );
        ConsumerHandle { workers }
    }

    async fn run_worker(&self, queue: &str, shutdown: CancellationToken, abort: CancellationToken) {
        tracing::debug!(queue, "queue worker started");

        while !shutdown.is_cancelled() {
            let idle = match self.poll_once(queue, &abort).await {
                Ok(handled) => handled == 0,
                Err(e) => {
                    tracing::error!(queue, error = %e, "failed to consume batch");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        tracing::debug!(queue, "queue worker stopped");
    }

    /// Claim one batch of `queue`, hand every message to its handler and commit
    ///
    /// Returns the number of messages handled; 0 means the queue was empty.
    /// Handler failures are logged and do not prevent the commit.
    pub async fn poll_once(&self, queue: &str, abort: &CancellationToken) -> Result<usize> {
        let Some(handler) = self.handlers.get(queue) else {
            return Ok(0);
        };

        let Some(batch) = self
            .db
            .claim_message_batch(
                &self.config.consumer_group,
                queue,
                self.config.batch_size,
                self.config.lease_timeout,
            )
            .await?
        else {
            return Ok(0);
        };

        if batch.redelivered {
            tracing::warn!(
                queue,
                lease_id = batch.lease_id,
                messages = batch.messages.len(),
                "redelivering batch with expired lease"
            );
        }

        for message in &batch.messages {
            if let Err(e) = handler.handle(&message.payload, abort).await {
                tracing::error!(
                    queue,
                    message_id = message.id,
                    error = %e,
                    "message handler failed, dropping message"
                );
            }
        }

        if !self.db.release_message_batch(&batch).await? {
            tracing::warn!(
                queue,
                lease_id = batch.lease_id,
                "lease was reclaimed by another worker, leaving commit to it"
            );
        }
        Ok(batch.messages.len())
    }
}

/// Running workers
pub struct ConsumerHandle {
    workers: JoinSet<()>,
}

impl ConsumerHandle {
    /// Wait for every worker to exit
    ///
    /// Cancel-safe: a timed-out join can be resumed.
    pub async fn join(&mut self) {
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "queue worker panicked");
            }
        }
    }

    /// Stop workers without waiting for their batches
    pub fn abort_all(&mut self) {
        self.workers.abort_all();
    }
}

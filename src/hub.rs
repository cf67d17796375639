//! Service wiring and lifecycle.

use crate::accounts::AccountManager;
use crate::auth::{CredentialHasher, TokenManager};
use crate::cache::{Cache, InMemoryCache, TakenAccountNameCache, TokenPublicKeyCache};
use crate::config::Config;
use crate::db::Database;
use crate::dispatch::DownloadTaskCreatedHandler;
use crate::mq::{Consumer, ConsumerBuilder, ConsumerHandle, MessageQueue};
use crate::tasks::DownloadTaskManager;
use crate::types::DOWNLOAD_TASK_CREATED_QUEUE;
use crate::{Result, storage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for in-flight batches before aborting transfers
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How long aborted transfers get to record their failure
const ABORT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// A fully wired dlhub instance
///
/// Construction validates the configuration, opens the database (running
/// migrations) and prepares object storage. It never touches existing tasks,
/// so instances sharing a database can start at any time. Queue workers start
/// only when [`start_consumers`](Self::start_consumers) is called.
pub struct DownloadHub {
    config: Arc<Config>,
    db: Database,
    accounts: AccountManager,
    tasks: DownloadTaskManager,
    queue: MessageQueue,
    consumer: Consumer,
    shutdown: CancellationToken,
    abort: CancellationToken,
    workers: Mutex<Option<ConsumerHandle>>,
}

impl DownloadHub {
    /// Build every component from `config`
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Database::open(&config.database).await?;
        let storage = storage::from_config(&config.storage).await?;
        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());

        let tokens = Arc::new(TokenManager::new(
            db.clone(),
            TokenPublicKeyCache::new(cache.clone()),
            &config.auth.token,
        )?);
        let accounts = AccountManager::new(
            db.clone(),
            CredentialHasher::new(&config.auth.hash)?,
            tokens.clone(),
            TakenAccountNameCache::new(cache),
        );
        let tasks = DownloadTaskManager::new(db.clone(), tokens, storage, &config)?;
        let queue = MessageQueue::new(db.clone(), &config.mq);

        let consumer = ConsumerBuilder::new(db.clone(), config.mq.clone())
            .register_handler(
                DOWNLOAD_TASK_CREATED_QUEUE,
                Arc::new(DownloadTaskCreatedHandler::new(tasks.clone())),
            )
            .build();

        tracing::info!(
            database = %config.database.path.display(),
            storage = ?config.storage.mode,
            "dlhub initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            accounts,
            tasks,
            queue,
            consumer,
            shutdown: CancellationToken::new(),
            abort: CancellationToken::new(),
            workers: Mutex::new(None),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Database handle
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Account operations
    pub fn accounts(&self) -> &AccountManager {
        &self.accounts
    }

    /// Task operations
    pub fn tasks(&self) -> &DownloadTaskManager {
        &self.tasks
    }

    /// Message producer
    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// Message consumer with every handler registered
    pub fn consumer(&self) -> &Consumer {
        &self.consumer
    }

    /// Unclaimed task events for this instance's consumer group
    pub async fn queue_lag(&self) -> Result<u64> {
        self.db
            .queue_lag(&self.config.mq.consumer_group, DOWNLOAD_TASK_CREATED_QUEUE)
            .await
    }

    /// Fail `Downloading` tasks abandoned by a crashed instance
    ///
    /// An operator action: a task counts as abandoned once its transfer has
    /// not refreshed it for `download.stale_downloading_after`. Returns the
    /// number of tasks failed.
    pub async fn recover_stale_tasks(&self) -> Result<u64> {
        self.tasks.fail_stale_tasks().await
    }

    /// Start queue workers; a second call is a no-op
    pub async fn start_consumers(&self) {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            tracing::warn!("queue consumers already running");
            return;
        }
        *workers = Some(
            self.consumer
                .start(self.shutdown.child_token(), self.abort.child_token()),
        );
    }

    /// Serve the REST API on `api.bind_address` in a background task
    pub fn spawn_api_server(self: &Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        let hub = self.clone();
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(hub, config).await })
    }

    /// Stop consumers and close the database
    ///
    /// New tasks are rejected with [`Error::ShuttingDown`](crate::Error::ShuttingDown)
    /// from here on. Workers finish and commit their current batch. If that
    /// takes longer than 30 seconds, running transfers are cancelled (and
    /// marked failed).
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("initiating graceful shutdown");
        self.tasks.stop_accepting();
        self.shutdown.cancel();

        if let Some(mut workers) = self.workers.lock().await.take()
            && tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, workers.join())
                .await
                .is_err()
        {
            tracing::warn!("timeout waiting for queue workers, aborting transfers");
            self.abort.cancel();

            if tokio::time::timeout(ABORT_GRACE_PERIOD, workers.join())
                .await
                .is_err()
            {
                tracing::error!("queue workers ignored abort");
                workers.abort_all();
            }
        }

        self.db.clone().close().await;
        tracing::info!("shutdown complete");
        Ok(())
    }
}

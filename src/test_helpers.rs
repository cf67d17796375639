//! Shared fixtures for unit tests.

use crate::cache::Cache;
use crate::config::{Config, HashConfig};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::hub::DownloadHub;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

/// Open a migrated database inside a fresh temp dir (keep the dir alive)
pub(crate) async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = tempdir().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
    (db, temp_dir)
}

/// Smallest hashing cost argon2 accepts; keeps tests fast
pub(crate) fn cheap_hash_config() -> HashConfig {
    HashConfig {
        memory_cost_kib: 8,
        time_cost: 1,
        parallelism: 1,
    }
}

/// Config rooted in `dir`, with local storage, cheap hashing and fast polling
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.database.path = dir.join("test.db");
    config.storage.download_dir = dir.join("downloads");
    config.auth.hash = cheap_hash_config();
    config.mq.poll_interval = Duration::from_millis(20);
    config.mq.produce_retry_delay = Duration::from_millis(1);
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    config.api.swagger_ui = false;
    config
}

/// A hub over a temp dir; consumers are not started
pub(crate) async fn create_test_hub() -> (Arc<DownloadHub>, TempDir) {
    let temp_dir = tempdir().unwrap();
    let hub = DownloadHub::new(test_config(temp_dir.path())).await.unwrap();
    (Arc::new(hub), temp_dir)
}

/// Cache whose every call fails
pub(crate) struct FailingCache;

#[async_trait]
impl Cache for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(Error::Cache("cache unavailable".into()))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<()> {
        Err(Error::Cache("cache unavailable".into()))
    }

    async fn set_add(&self, _key: &str, _member: &str) -> Result<()> {
        Err(Error::Cache("cache unavailable".into()))
    }

    async fn set_contains(&self, _key: &str, _member: &str) -> Result<bool> {
        Err(Error::Cache("cache unavailable".into()))
    }
}

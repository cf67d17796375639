//! Test configuration helpers for creating hubs over temp directories

use dlhub::config::HashConfig;
use dlhub::{Config, DownloadHub};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Config rooted in `dir` with cheap hashing and fast polling
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.database.path = dir.join("dlhub.db");
    config.storage.download_dir = dir.join("downloads");
    config.auth.hash = HashConfig {
        memory_cost_kib: 8,
        time_cost: 1,
        parallelism: 1,
    };
    config.mq.poll_interval = Duration::from_millis(20);
    config.api.swagger_ui = false;
    config
}

/// A hub over a fresh temp dir; keep the TempDir alive
pub async fn create_hub() -> (Arc<DownloadHub>, TempDir) {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let hub = DownloadHub::new(test_config(temp_dir.path()))
        .await
        .expect("build hub");
    (Arc::new(hub), temp_dir)
}

/// Register `name` and return a session token for it
pub async fn sign_up(hub: &DownloadHub, name: &str) -> String {
    hub.accounts()
        .create_account(name, "password")
        .await
        .expect("create account");
    let (token, _) = hub
        .accounts()
        .create_session(name, "password")
        .await
        .expect("create session");
    token.token
}

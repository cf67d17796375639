//! Configuration types for dlhub

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// Main configuration for [`DownloadHub`](crate::DownloadHub)
///
/// Fields are organized into nested sub-configs:
/// - [`database`](DatabaseConfig) — SQLite file and pool size
/// - [`auth`](AuthConfig) — password hashing cost and token lifetime
/// - [`storage`](StorageConfig) — local directory or S3-compatible bucket
/// - [`mq`](MqConfig) — consumer group, batching and leases
/// - [`download`](DownloadConfig) — outbound HTTP client settings
/// - [`api`](ApiConfig) — REST server settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Object storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Message queue settings
    #[serde(default)]
    pub mq: MqConfig,

    /// Download execution settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Check cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        let token = &self.auth.token;
        if token.expires_in.is_zero() {
            return Err(Error::config(
                "auth.token.expires_in",
                "token lifetime must be greater than zero",
            ));
        }
        if token.regenerate_before_expiry >= token.expires_in {
            return Err(Error::config(
                "auth.token.regenerate_before_expiry",
                "must be shorter than auth.token.expires_in",
            ));
        }

        let hash = &self.auth.hash;
        if hash.time_cost == 0 || hash.parallelism == 0 {
            return Err(Error::config(
                "auth.hash",
                "time_cost and parallelism must be at least 1",
            ));
        }
        if hash.memory_cost_kib < 8 * hash.parallelism {
            return Err(Error::config(
                "auth.hash.memory_cost_kib",
                "must be at least 8 KiB per lane",
            ));
        }

        if self.database.max_connections == 0 {
            return Err(Error::config(
                "database.max_connections",
                "pool needs at least one connection",
            ));
        }

        if self.mq.batch_size == 0 {
            return Err(Error::config("mq.batch_size", "must be at least 1"));
        }
        if self.mq.consumer_group.trim().is_empty() {
            return Err(Error::config("mq.consumer_group", "must not be empty"));
        }

        let download = &self.download;
        if download.heartbeat_interval.is_zero() {
            return Err(Error::config(
                "download.heartbeat_interval",
                "must be greater than zero",
            ));
        }
        // Seconds-resolution timestamps need a full second of slack
        if download.stale_downloading_after
            < download.heartbeat_interval * 2 + Duration::from_secs(1)
        {
            return Err(Error::config(
                "download.stale_downloading_after",
                "must exceed two heartbeat intervals plus one second",
            ));
        }

        if self.api.file_chunk_size == 0 {
            return Err(Error::config("api.file_chunk_size", "must be at least 1"));
        }

        if self.storage.mode == StorageMode::S3 {
            let Some(s3) = &self.storage.s3 else {
                return Err(Error::config(
                    "storage.s3",
                    "S3 storage mode requires an s3 section",
                ));
            };
            if s3.bucket.is_empty() {
                return Err(Error::config("storage.s3.bucket", "must not be empty"));
            }
            // S3 rejects multipart parts under 5 MiB (except the last one)
            if s3.part_size < MIN_S3_PART_SIZE {
                return Err(Error::config(
                    "storage.s3.part_size",
                    format!("must be at least {MIN_S3_PART_SIZE} bytes"),
                ));
            }
        }

        Ok(())
    }
}

/// Smallest part size accepted by S3 multipart uploads
pub const MIN_S3_PART_SIZE: usize = 5 * 1024 * 1024;

/// SQLite settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database path (default: "dlhub.db")
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Maximum pooled connections (default: 5)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a connection waits on a locked database before failing (default: 5 seconds)
    #[serde(default = "default_busy_timeout", with = "duration_serde")]
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
            busy_timeout: default_busy_timeout(),
        }
    }
}

/// Authentication settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Password hashing cost
    #[serde(default)]
    pub hash: HashConfig,

    /// Token lifetime and key rotation
    #[serde(default)]
    pub token: TokenConfig,
}

/// Argon2id cost parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HashConfig {
    /// Memory cost in KiB (default: 19456, 19 MiB)
    #[serde(default = "default_memory_cost")]
    pub memory_cost_kib: u32,

    /// Number of passes (default: 2)
    #[serde(default = "default_time_cost")]
    pub time_cost: u32,

    /// Degree of parallelism (default: 1)
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_cost_kib: default_memory_cost(),
            time_cost: default_time_cost(),
            parallelism: default_parallelism(),
        }
    }
}

/// Token lifetime and signing key rotation
///
/// A signing key is used for `expires_in` after creation. Once the remaining
/// lifetime drops below `regenerate_before_expiry`, the next token request
/// rotates to a fresh key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Token and signing key lifetime (default: 24 hours)
    #[serde(default = "default_token_expires_in", with = "duration_serde")]
    pub expires_in: Duration,

    /// Rotation window before the active key expires (default: 1 hour)
    #[serde(default = "default_regenerate_before_expiry", with = "duration_serde")]
    pub regenerate_before_expiry: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            expires_in: default_token_expires_in(),
            regenerate_before_expiry: default_regenerate_before_expiry(),
        }
    }
}

/// Storage backend selector
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Files under a local directory (default)
    #[default]
    Local,
    /// Objects in an S3-compatible bucket
    S3,
}

/// Object storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend to use
    #[serde(default)]
    pub mode: StorageMode,

    /// Root directory for local mode (default: "downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Bucket settings for S3 mode
    #[serde(default)]
    pub s3: Option<S3Config>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Local,
            download_dir: default_download_dir(),
            s3: None,
        }
    }
}

/// S3-compatible bucket settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct S3Config {
    /// Endpoint URL (e.g. "http://localhost:9000" for MinIO)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Region (default: "us-east-1")
    #[serde(default = "default_region")]
    pub region: String,

    /// Bucket name, created at startup when missing
    pub bucket: String,

    /// Access key ID
    pub access_key: String,

    /// Secret access key
    pub secret_key: String,

    /// Use path-style addressing (default: true)
    #[serde(default = "default_true")]
    pub force_path_style: bool,

    /// Multipart upload part size in bytes (default: 8 MiB)
    #[serde(default = "default_part_size")]
    pub part_size: usize,
}

/// Message queue settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MqConfig {
    /// Consumer group shared by every worker of this service (default: "dlhub")
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Messages claimed per batch (default: 16)
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Delay between polls of an empty queue (default: 500 ms)
    #[serde(default = "default_poll_interval", with = "duration_millis_serde")]
    pub poll_interval: Duration,

    /// Claimed batches older than this are redelivered (default: 10 minutes)
    #[serde(default = "default_lease_timeout", with = "duration_serde")]
    pub lease_timeout: Duration,

    /// Delay before the single retry of a produce, task creation or terminal
    /// status write that hit lock contention (default: 100 ms)
    #[serde(default = "default_produce_retry_delay", with = "duration_millis_serde")]
    pub produce_retry_delay: Duration,
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            consumer_group: default_consumer_group(),
            batch_size: default_batch_size(),
            poll_interval: default_poll_interval(),
            lease_timeout: default_lease_timeout(),
            produce_retry_delay: default_produce_retry_delay(),
        }
    }
}

/// Download execution settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// User-Agent sent with outbound requests (default: "dlhub/<version>")
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// TCP connect timeout (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// How often a running transfer refreshes its task's `updated_at` (default: 30 seconds)
    #[serde(default = "default_heartbeat_interval", with = "duration_millis_serde")]
    pub heartbeat_interval: Duration,

    /// Downloading tasks without a heartbeat for this long count as abandoned
    /// by [`DownloadHub::recover_stale_tasks`](crate::DownloadHub::recover_stale_tasks)
    /// (default: 1 hour)
    #[serde(default = "default_stale_downloading_after", with = "duration_serde")]
    pub stale_downloading_after: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout: default_connect_timeout(),
            heartbeat_interval: default_heartbeat_interval(),
            stale_downloading_after: default_stale_downloading_after(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Bytes per chunk when streaming task files (default: 64 KiB)
    #[serde(default = "default_file_chunk_size")]
    pub file_chunk_size: usize,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,

    /// Mark the auth cookie `Secure` (default: false)
    #[serde(default)]
    pub secure_cookie: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            file_chunk_size: default_file_chunk_size(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
            secure_cookie: false,
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("dlhub.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_memory_cost() -> u32 {
    19 * 1024
}

fn default_time_cost() -> u32 {
    2
}

fn default_parallelism() -> u32 {
    1
}

fn default_token_expires_in() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_regenerate_before_expiry() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_part_size() -> usize {
    8 * 1024 * 1024
}

fn default_consumer_group() -> String {
    "dlhub".to_string()
}

fn default_batch_size() -> u32 {
    16
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_lease_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_produce_retry_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_user_agent() -> String {
    concat!("dlhub/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_stale_downloading_after() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_file_chunk_size() -> usize {
    64 * 1024
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn s3_config() -> S3Config {
        S3Config {
            endpoint: Some("http://localhost:9000".into()),
            region: default_region(),
            bucket: "downloads".into(),
            access_key: "minio".into(),
            secret_key: "minio123".into(),
            force_path_style: true,
            part_size: default_part_size(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn empty_json_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.database.path, PathBuf::from("dlhub.db"));
        assert_eq!(config.storage.mode, StorageMode::Local);
        assert_eq!(config.mq.consumer_group, "dlhub");
        assert_eq!(config.api.file_chunk_size, 64 * 1024);
        assert_eq!(config.auth.token.expires_in, Duration::from_secs(86_400));
    }

    #[test]
    fn durations_deserialize_in_their_units() {
        let json = r#"{
            "auth": { "token": { "expires_in": 120, "regenerate_before_expiry": 30 } },
            "mq": { "poll_interval": 25, "lease_timeout": 60 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.auth.token.expires_in, Duration::from_secs(120));
        assert_eq!(
            config.auth.token.regenerate_before_expiry,
            Duration::from_secs(30)
        );
        assert_eq!(config.mq.poll_interval, Duration::from_millis(25));
        assert_eq!(config.mq.lease_timeout, Duration::from_secs(60));
        config.validate().unwrap();
    }

    #[test]
    fn regenerate_window_must_be_shorter_than_lifetime() {
        let mut config = Config::default();
        config.auth.token.expires_in = Duration::from_secs(60);
        config.auth.token.regenerate_before_expiry = Duration::from_secs(60);

        let err = config.validate().unwrap_err();
        match err {
            Error::Config { key, .. } => {
                assert_eq!(key.as_deref(), Some("auth.token.regenerate_before_expiry"))
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn stale_threshold_must_outlast_heartbeats() {
        let mut config = Config::default();
        config.download.heartbeat_interval = Duration::from_millis(500);
        config.download.stale_downloading_after = Duration::from_secs(1);

        match config.validate().unwrap_err() {
            Error::Config { key, .. } => {
                assert_eq!(key.as_deref(), Some("download.stale_downloading_after"))
            }
            other => panic!("expected config error, got {other:?}"),
        }

        config.download.stale_downloading_after = Duration::from_secs(3);
        config.validate().unwrap();
    }

    #[test]
    fn s3_mode_requires_bucket_section() {
        let mut config = Config::default();
        config.storage.mode = StorageMode::S3;
        assert!(config.validate().is_err());

        config.storage.s3 = Some(s3_config());
        config.validate().unwrap();
    }

    #[test]
    fn s3_part_size_has_a_floor() {
        let mut config = Config::default();
        config.storage.mode = StorageMode::S3;
        config.storage.s3 = Some(S3Config {
            part_size: 1024,
            ..s3_config()
        });

        assert!(config.validate().is_err());
    }

    #[test]
    fn storage_mode_uses_snake_case() {
        let mode: StorageMode = serde_json::from_str("\"s3\"").unwrap();
        assert_eq!(mode, StorageMode::S3);
        assert_eq!(serde_json::to_string(&StorageMode::Local).unwrap(), "\"local\"");
    }
}

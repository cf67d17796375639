//! Core types for dlhub

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Defines an `i64` newtype id with the conversions and sqlx codecs every id needs
macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

id_newtype!(
    /// Unique identifier for an account
    AccountId
);

id_newtype!(
    /// Unique identifier for a download task
    DownloadTaskId
);

id_newtype!(
    /// Identifier of a token signing key pair
    KeyId
);

/// Download task status
///
/// Transitions form a DAG: `Pending -> Downloading -> {Success, Failed}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Created, waiting for execution
    Pending,
    /// Transfer in progress
    Downloading,
    /// Transfer failed, see the `error` metadata entry
    Failed,
    /// Artifact stored
    Success,
}

impl DownloadStatus {
    /// Convert integer status code to DownloadStatus enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            1 => DownloadStatus::Pending,
            2 => DownloadStatus::Downloading,
            3 => DownloadStatus::Failed,
            4 => DownloadStatus::Success,
            _ => DownloadStatus::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert DownloadStatus enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            DownloadStatus::Pending => 1,
            DownloadStatus::Downloading => 2,
            DownloadStatus::Failed => 3,
            DownloadStatus::Success => 4,
        }
    }

    /// Lowercase name, as used in API payloads and error details
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Success => "success",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a task's URL is fetched
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DownloadType {
    /// No downloader is registered for this type
    #[default]
    Unspecified,
    /// Plain HTTP(S) GET
    Http,
}

impl DownloadType {
    /// Convert integer type code to DownloadType enum
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => DownloadType::Http,
            _ => DownloadType::Unspecified,
        }
    }

    /// Convert DownloadType enum to integer type code
    pub fn to_i32(&self) -> i32 {
        match self {
            DownloadType::Unspecified => 0,
            DownloadType::Http => 1,
        }
    }
}

/// Task metadata keys written by the executor
pub mod metadata_keys {
    /// MIME type reported by the origin server
    pub const CONTENT_TYPE: &str = "content-type";
    /// Length reported by the origin server, when present
    pub const CONTENT_LENGTH: &str = "content-length";
    /// Bytes actually written to storage
    pub const SIZE: &str = "size";
    /// Storage object name of the artifact
    pub const FILE_NAME: &str = "file-name";
    /// Failure description
    pub const ERROR: &str = "error";
}

/// Account as exposed to callers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Account {
    /// Account ID
    pub id: AccountId,
    /// Unique account name
    pub name: String,
}

/// A download task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DownloadTask {
    /// Task ID
    pub id: DownloadTaskId,
    /// Owning account
    pub owner_account_id: AccountId,
    /// How the URL is fetched
    pub download_type: DownloadType,
    /// Source URL
    pub url: String,
    /// Current status
    pub status: DownloadStatus,
    /// Key/value metadata (content type, size, file name, error)
    pub metadata: BTreeMap<String, String>,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// When the task was last modified
    pub updated_at: DateTime<Utc>,
}

/// One page of a caller's tasks
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadTaskPage {
    /// Tasks on this page, ordered by id
    pub tasks: Vec<DownloadTask>,
    /// Total number of tasks owned by the caller, independent of paging
    pub total: u64,
}

/// Signed session token plus its expiry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionToken {
    /// Opaque bearer token
    pub token: String,
    /// When the token stops verifying
    pub expires_at: DateTime<Utc>,
}

/// Event published when a task is created
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTaskCreated {
    /// The new task
    pub id: DownloadTaskId,
}

/// Queue carrying [`DownloadTaskCreated`] events
pub const DOWNLOAD_TASK_CREATED_QUEUE: &str = "download_task_created";

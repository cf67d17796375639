//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`accounts`] — Registration and sign-in
//! - [`tasks`] — Download task management and file streaming
//! - [`system`] — Health and OpenAPI

use crate::types::{Account, DownloadType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

mod accounts;
mod system;
mod tasks;

// Re-export all handlers so `routes::function_name` continues to work
pub use accounts::*;
pub use system::*;
pub use tasks::*;

// ============================================================================
// Query/Request Types (shared across handlers)
// ============================================================================

/// Body of `POST /accounts` and `POST /sessions`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountCredentials {
    /// Account name (1 to 64 characters)
    pub name: String,
    /// Password
    pub password: String,
}

/// Response of `POST /sessions`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    /// Session token; also set as the `dlhub_session` cookie
    pub token: String,
    /// When the token stops verifying
    pub expires_at: DateTime<Utc>,
    /// The signed-in account
    pub account: Account,
}

/// Body of `POST /download-tasks`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateDownloadTaskRequest {
    /// Absolute http(s) URL to fetch
    pub url: String,
    /// How to fetch it (default: http)
    #[serde(default = "default_download_type")]
    pub download_type: DownloadType,
}

fn default_download_type() -> DownloadType {
    DownloadType::Http
}

/// Body of `PATCH /download-tasks/:id`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateDownloadTaskRequest {
    /// New URL
    pub url: String,
}

/// Query parameters for `GET /download-tasks`
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ListDownloadTasksQuery {
    /// Page size, 1 to 100 (0 or omitted: 10)
    #[serde(default)]
    pub limit: u32,
    /// Tasks to skip
    #[serde(default)]
    pub offset: u64,
}

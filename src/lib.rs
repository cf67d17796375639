//! # dlhub
//!
//! Multi-tenant download service backend.
//!
//! Accounts sign in with a password and receive a signed session token.
//! With that token they register URLs as download tasks; each task is
//! created together with a queued event, and a background consumer fetches
//! the URL into object storage (a local directory or an S3-compatible
//! bucket). Callers page through their tasks, change or delete them, and
//! stream the stored file back.
//!
//! ## Design
//!
//! - **One database** - SQLite holds accounts, tasks, token keys and the
//!   message queue, so a task and its event commit atomically
//! - **At-least-once execution** - redelivered events are harmless because a
//!   task only leaves `Pending` once, under a row lock
//! - **Library-first** - the REST API is optional and no tracing subscriber
//!   is installed
//!
//! ## Quick Start
//!
//! ```no_run
//! use dlhub::{Config, DownloadHub, run_with_shutdown};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Arc::new(DownloadHub::new(Config::default()).await?);
//!
//!     hub.start_consumers().await;
//!     let _api = hub.spawn_api_server();
//!
//!     run_with_shutdown(&hub).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Account registration and sign-in
pub mod accounts;
/// REST API module
pub mod api;
/// Password hashing and session tokens
pub mod auth;
/// Cache-aside helpers
pub mod cache;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Queue handlers
pub mod dispatch;
/// Error types
pub mod error;
/// Service wiring and lifecycle
pub mod hub;
/// Database-backed message queue
pub mod mq;
/// Retry logic for transient failures
pub mod retry;
/// Object storage backends
pub mod storage;
/// Download task lifecycle
pub mod tasks;
/// Core types
pub mod types;

#[cfg(test)]
mod test_helpers;

// Re-export commonly used types
pub use accounts::AccountManager;
pub use config::Config;
pub use db::Database;
pub use error::{
    ApiError, DatabaseError, DownloadTaskError, Error, ErrorDetail, ErrorKind, Result,
    ToHttpStatus,
};
pub use hub::DownloadHub;
pub use tasks::DownloadTaskManager;
pub use types::{
    Account, AccountId, DownloadStatus, DownloadTask, DownloadTaskId, DownloadTaskPage,
    DownloadType, SessionToken,
};

/// Run until a termination signal arrives, then shut the hub down
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use dlhub::{Config, DownloadHub, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let hub = DownloadHub::new(Config::default()).await?;
///     hub.start_consumers().await;
///
///     run_with_shutdown(&hub).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(hub: &DownloadHub) -> Result<()> {
    wait_for_signal().await;
    hub.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}

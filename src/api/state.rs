//! Application state for the API server

use crate::{Config, DownloadHub};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
#[derive(Clone)]
pub struct AppState {
    /// The wired service
    pub hub: Arc<DownloadHub>,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(hub: Arc<DownloadHub>, config: Arc<Config>) -> Self {
        Self { hub, config }
    }
}

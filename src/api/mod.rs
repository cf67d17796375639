//! REST API server module
//!
//! Exposes account, session and download task operations over HTTP with an
//! OpenAPI description. Callers authenticate with the session token either as
//! `Authorization: Bearer <token>` or through the cookie set by
//! `POST /sessions`.

use crate::{Config, DownloadHub, Result};
use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod auth;
pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Accounts
/// - `POST /accounts` - Register an account
/// - `POST /sessions` - Sign in; returns a token and sets the session cookie
///
/// ## Download Tasks
/// - `POST /download-tasks` - Create a task
/// - `GET /download-tasks` - List the caller's tasks (`limit`, `offset`)
/// - `GET /download-tasks/:id` - Get one task
/// - `PATCH /download-tasks/:id` - Change the URL of a pending task
/// - `DELETE /download-tasks/:id` - Delete a task that is not downloading
/// - `GET /download-tasks/:id/file` - Stream the downloaded file
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive documentation (if enabled)
pub fn create_router(hub: Arc<DownloadHub>, config: Arc<Config>) -> Router {
    let state = AppState::new(hub, config.clone());

    let router = Router::new()
        // Accounts
        .route("/accounts", post(routes::create_account))
        .route("/sessions", post(routes::create_session))
        // Download tasks
        .route(
            "/download-tasks",
            post(routes::create_download_task).get(routes::list_download_tasks),
        )
        .route(
            "/download-tasks/:id",
            get(routes::get_download_task)
                .patch(routes::update_download_task)
                .delete(routes::delete_download_task),
        )
        .route("/download-tasks/:id/file", get(routes::get_download_task_file))
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec));

    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router
        .with_state(state)
        .layer(middleware::from_fn(auth::clear_cookie_on_unauthenticated))
        .layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        router.layer(build_cors_layer(&config.api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` or an empty list allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on `api.bind_address`
///
/// Runs until the server fails or the task is dropped.
///
/// # Example
///
/// ```no_run
/// use dlhub::{Config, DownloadHub};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let hub = Arc::new(DownloadHub::new((*config).clone()).await?);
///
/// dlhub::api::start_api_server(hub, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(hub: Arc<DownloadHub>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;
    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(hub, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

//! OpenAPI documentation and schema generation
//!
//! The document is generated at compile time by utoipa from the handler
//! annotations in [`crate::api::routes`].

use utoipa::OpenApi;

/// OpenAPI documentation for the dlhub REST API
///
/// Served at `/openapi.json`, and through `/swagger-ui` when enabled.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "dlhub REST API",
        version = "0.1.0",
        description = "Multi-tenant download service: accounts, sessions, asynchronous download tasks and their stored files",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server")
    ),
    paths(
        // Accounts
        crate::api::routes::create_account,
        crate::api::routes::create_session,

        // Download tasks
        crate::api::routes::create_download_task,
        crate::api::routes::list_download_tasks,
        crate::api::routes::get_download_task,
        crate::api::routes::update_download_task,
        crate::api::routes::delete_download_task,
        crate::api::routes::get_download_task_file,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        crate::types::AccountId,
        crate::types::DownloadTaskId,
        crate::types::Account,
        crate::types::DownloadStatus,
        crate::types::DownloadType,
        crate::types::DownloadTask,
        crate::types::DownloadTaskPage,
        crate::types::SessionToken,

        crate::api::routes::AccountCredentials,
        crate::api::routes::SessionResponse,
        crate::api::routes::CreateDownloadTaskRequest,
        crate::api::routes::UpdateDownloadTaskRequest,

        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "accounts", description = "Accounts - Register and sign in"),
        (name = "download-tasks", description = "Download tasks - Create, inspect, update, delete, and fetch the stored file"),
        (name = "system", description = "System endpoints - Health checks and the OpenAPI document"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Declares the two ways a session token can be presented
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};

        if let Some(components) = &mut openapi.components {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
            components.add_security_scheme(
                "session_cookie",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(
                    crate::api::auth::SESSION_COOKIE,
                ))),
            );
        }
    }
}

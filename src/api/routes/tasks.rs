//! Download task handlers.

use super::{CreateDownloadTaskRequest, ListDownloadTasksQuery, UpdateDownloadTaskRequest};
use crate::api::AppState;
use crate::api::auth::SessionCredential;
use crate::types::DownloadTaskId;
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};

/// POST /download-tasks - Create a download task
#[utoipa::path(
    post,
    path = "/download-tasks",
    tag = "download-tasks",
    request_body = CreateDownloadTaskRequest,
    responses(
        (status = 201, description = "Task created and queued", body = crate::types::DownloadTask),
        (status = 400, description = "Invalid URL", body = crate::error::ApiError),
        (status = 401, description = "Missing or invalid session token", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn create_download_task(
    State(state): State<AppState>,
    SessionCredential(token): SessionCredential,
    Json(request): Json<CreateDownloadTaskRequest>,
) -> Response {
    match state
        .hub
        .tasks()
        .create_download_task(&token, &request.url, request.download_type)
        .await
    {
        Ok(task) => (StatusCode::CREATED, Json(task)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /download-tasks - List the caller's tasks
#[utoipa::path(
    get,
    path = "/download-tasks",
    tag = "download-tasks",
    params(ListDownloadTasksQuery),
    responses(
        (status = 200, description = "One page of tasks plus the total count", body = crate::types::DownloadTaskPage),
        (status = 401, description = "Missing or invalid session token", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn list_download_tasks(
    State(state): State<AppState>,
    SessionCredential(token): SessionCredential,
    Query(query): Query<ListDownloadTasksQuery>,
) -> Response {
    match state
        .hub
        .tasks()
        .get_download_task_list(&token, query.limit, query.offset)
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /download-tasks/:id - Get one task
#[utoipa::path(
    get,
    path = "/download-tasks/{id}",
    tag = "download-tasks",
    params(
        ("id" = i64, Path, description = "Download task ID")
    ),
    responses(
        (status = 200, description = "The task", body = crate::types::DownloadTask),
        (status = 401, description = "Missing or invalid session token", body = crate::error::ApiError),
        (status = 404, description = "Task not found", body = crate::error::ApiError)
    )
)]
pub async fn get_download_task(
    State(state): State<AppState>,
    SessionCredential(token): SessionCredential,
    Path(id): Path<i64>,
) -> Response {
    match state
        .hub
        .tasks()
        .get_download_task(&token, DownloadTaskId(id))
        .await
    {
        Ok(task) => Json(task).into_response(),
        Err(e) => e.into_response(),
    }
}

/// PATCH /download-tasks/:id - Change the URL of a pending task
#[utoipa::path(
    patch,
    path = "/download-tasks/{id}",
    tag = "download-tasks",
    params(
        ("id" = i64, Path, description = "Download task ID")
    ),
    request_body = UpdateDownloadTaskRequest,
    responses(
        (status = 200, description = "Updated task", body = crate::types::DownloadTask),
        (status = 400, description = "Invalid URL", body = crate::error::ApiError),
        (status = 401, description = "Missing or invalid session token", body = crate::error::ApiError),
        (status = 404, description = "Task not found", body = crate::error::ApiError),
        (status = 409, description = "Task is no longer pending", body = crate::error::ApiError)
    )
)]
pub async fn update_download_task(
    State(state): State<AppState>,
    SessionCredential(token): SessionCredential,
    Path(id): Path<i64>,
    Json(request): Json<UpdateDownloadTaskRequest>,
) -> Response {
    match state
        .hub
        .tasks()
        .update_download_task(&token, DownloadTaskId(id), &request.url)
        .await
    {
        Ok(task) => Json(task).into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /download-tasks/:id - Delete a task
#[utoipa::path(
    delete,
    path = "/download-tasks/{id}",
    tag = "download-tasks",
    params(
        ("id" = i64, Path, description = "Download task ID")
    ),
    responses(
        (status = 204, description = "Task deleted"),
        (status = 401, description = "Missing or invalid session token", body = crate::error::ApiError),
        (status = 404, description = "Task not found", body = crate::error::ApiError),
        (status = 409, description = "Task is downloading", body = crate::error::ApiError)
    )
)]
pub async fn delete_download_task(
    State(state): State<AppState>,
    SessionCredential(token): SessionCredential,
    Path(id): Path<i64>,
) -> Response {
    match state
        .hub
        .tasks()
        .delete_download_task(&token, DownloadTaskId(id))
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /download-tasks/:id/file - Stream the downloaded file
#[utoipa::path(
    get,
    path = "/download-tasks/{id}/file",
    tag = "download-tasks",
    params(
        ("id" = i64, Path, description = "Download task ID")
    ),
    responses(
        (status = 200, description = "File body with the stored content type", content_type = "application/octet-stream"),
        (status = 401, description = "Missing or invalid session token", body = crate::error::ApiError),
        (status = 404, description = "Task or file not found", body = crate::error::ApiError),
        (status = 409, description = "Task has not succeeded", body = crate::error::ApiError)
    )
)]
pub async fn get_download_task_file(
    State(state): State<AppState>,
    SessionCredential(token): SessionCredential,
    Path(id): Path<i64>,
) -> Response {
    let file = match state
        .hub
        .tasks()
        .get_download_task_file(&token, DownloadTaskId(id))
        .await
    {
        Ok(file) => file,
        Err(e) => return e.into_response(),
    };

    let content_type = HeaderValue::from_str(&file.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file.file_name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    let mut response = Body::from_stream(file.stream).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, content_type);
    headers.insert(CONTENT_DISPOSITION, disposition);
    if let Some(size) = file.size {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
    }
    response
}

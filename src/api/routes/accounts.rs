//! Account and session handlers.

use super::{AccountCredentials, SessionResponse};
use crate::api::AppState;
use crate::api::auth::session_cookie;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};

/// POST /accounts - Register an account
#[utoipa::path(
    post,
    path = "/accounts",
    tag = "accounts",
    request_body = AccountCredentials,
    responses(
        (status = 201, description = "Account created", body = crate::types::Account),
        (status = 400, description = "Invalid name or password", body = crate::error::ApiError),
        (status = 409, description = "Name already taken", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<AccountCredentials>,
) -> Response {
    match state
        .hub
        .accounts()
        .create_account(&request.name, &request.password)
        .await
    {
        Ok(account) => (StatusCode::CREATED, Json(account)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /sessions - Sign in
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "accounts",
    request_body = AccountCredentials,
    responses(
        (status = 200, description = "Session created; the token is also set as a cookie", body = SessionResponse),
        (status = 401, description = "Wrong password", body = crate::error::ApiError),
        (status = 404, description = "Unknown account", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<AccountCredentials>,
) -> Response {
    let (token, account) = match state
        .hub
        .accounts()
        .create_session(&request.name, &request.password)
        .await
    {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    let cookie = session_cookie(&token.token, token.expires_at, state.config.api.secure_cookie);
    let mut response = Json(SessionResponse {
        token: token.token,
        expires_at: token.expires_at,
        account,
    })
    .into_response();

    if let Some(cookie) = cookie {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

//! Session token transport for the REST API
//!
//! The token is read from `Authorization: Bearer <token>` first and from the
//! `dlhub_session` cookie otherwise. `POST /sessions` sets the cookie; any
//! 401 response clears it.

use crate::Error;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, COOKIE, SET_COOKIE},
        request::Parts,
    },
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};

/// Cookie carrying the session token
pub const SESSION_COOKIE: &str = "dlhub_session";

/// Session token presented by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredential(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SessionCredential {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        token_from_headers(&parts.headers)
            .map(SessionCredential)
            .ok_or_else(|| Error::Unauthenticated("missing session token".into()))
    }
}

fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// `Set-Cookie` value carrying `token` until `expires_at`
pub fn session_cookie(token: &str, expires_at: DateTime<Utc>, secure: bool) -> Option<HeaderValue> {
    let max_age = (expires_at - Utc::now()).num_seconds().max(0);
    let secure = if secure { "; Secure" } else { "" };

    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age}{secure}"
    ))
    .ok()
}

/// `Set-Cookie` value removing the session cookie
pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("dlhub_session=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0")
}

/// Middleware clearing the session cookie on every 401 response
pub async fn clear_cookie_on_unauthenticated(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    if response.status() == StatusCode::UNAUTHORIZED {
        response
            .headers_mut()
            .append(SET_COOKIE, clear_session_cookie());
    }
    response
}

//! Session issuance, cookie handling, and logout.

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::error::ApiError;

use super::state::{AuthConfig, AuthState};
use super::storage::{revoke_token, AccountRecord};
use super::types::{AccountProfile, TokenResponse};
use super::utils::hash_token;

const SESSION_COOKIE_NAME: &str = "manzil_session";

/// Sign a session token for the account and build the 200 response carrying
/// it in both the body and an `HttpOnly` cookie.
pub(super) fn issue_session(
    auth_state: &AuthState,
    account: AccountRecord,
) -> Result<Response, ApiError> {
    let token = auth_state
        .tokens()
        .sign(account.id, auth_state.config().session_ttl_seconds())?;

    let mut headers = HeaderMap::new();
    if let Ok(cookie) = session_cookie(auth_state, &token) {
        headers.insert(SET_COOKIE, cookie);
    }

    let body = TokenResponse {
        token,
        account: AccountProfile::from(account),
    };
    Ok((StatusCode::OK, headers, Json(body)).into_response())
}

/// Revoke the presented token and clear the cookie.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    // Missing or unverifiable tokens get the same benign response; there is
    // nothing to revoke and nothing worth leaking.
    if let Some(token) = extract_session_token(&headers) {
        if let Ok(claims) = auth_state.tokens().verify(&token) {
            let expires_at =
                DateTime::<Utc>::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now);
            // The token stays cryptographically valid until exp; the
            // revocation row blocks it in the guard until then.
            revoke_token(&pool, &hash_token(&token), expires_at).await?;
        }
    }

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    Ok((StatusCode::NO_CONTENT, response_headers).into_response())
}

/// Build a secure `HttpOnly` cookie for the session token.
pub(super) fn session_cookie(
    auth_state: &AuthState,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = auth_state.config().session_ttl_seconds();
    // Only mark cookies secure when the frontend is served over HTTPS.
    let secure = auth_state.config().session_cookie_secure();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_session_cookie(auth_config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = auth_config.session_cookie_secure();
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Bearer header wins over the cookie when both are present.
pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

//! Login endpoints (phone + password).

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::error::{ApiError, ErrorBody};

use super::guard::require_role;
use super::password::verify_password_blocking;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::issue_session;
use super::state::AuthState;
use super::storage::{find_account_by_phone, AccountRecord};
use super::types::{LoginRequest, Role, TokenResponse};
use super::utils::extract_client_ip;

/// Shared credential check. Every failure collapses to the same
/// `Unauthorized` so callers cannot probe which part was wrong.
async fn check_credentials(
    pool: &PgPool,
    phone: &str,
    password: String,
) -> Result<AccountRecord, ApiError> {
    let Some(account) = find_account_by_phone(pool, phone).await? else {
        return Err(ApiError::incorrect_credentials());
    };

    if !account.login_eligible() {
        return Err(ApiError::incorrect_credentials());
    }

    let Some(stored_phc) = account.password_hash.clone() else {
        return Err(ApiError::incorrect_credentials());
    };

    if !verify_password_blocking(password, stored_phc).await? {
        return Err(ApiError::incorrect_credentials());
    }

    Ok(account)
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 400, description = "Missing fields", body = ErrorBody),
        (status = 401, description = "Incorrect credentials", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response, ApiError> {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return Err(ApiError::Validation("Missing payload".to_string())),
    };

    let phone = request.phone.trim().to_string();
    if phone.is_empty() || request.password.is_empty() {
        return Err(ApiError::Validation(
            "Please provide phone and password".to_string(),
        ));
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
    {
        return Ok((StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response());
    }

    let account = check_credentials(&pool, &phone, request.password).await?;

    issue_session(&auth_state, account)
}

/// Login restricted to administrator accounts.
#[utoipa::path(
    post,
    path = "/v1/auth/admin/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 401, description = "Incorrect credentials", body = ErrorBody),
        (status = 403, description = "Not an administrator", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn admin_login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response, ApiError> {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return Err(ApiError::Validation("Missing payload".to_string())),
    };

    let phone = request.phone.trim().to_string();
    if phone.is_empty() || request.password.is_empty() {
        return Err(ApiError::Validation(
            "Please provide phone and password".to_string(),
        ));
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
    {
        return Ok((StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response());
    }

    let account = check_credentials(&pool, &phone, request.password).await?;

    // Role check runs only after the credentials pass, so the 403 cannot be
    // used to find admin phone numbers.
    require_role(&account, Role::Admin)?;

    issue_session(&auth_state, account)
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::NoopRateLimiter;
    use super::super::state::{AuthConfig, AuthState};
    use super::{admin_login, login, LoginRequest};
    use crate::api::email::LogEmailSender;
    use anyhow::Result;
    use axum::extract::Extension;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::Json;
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;

    fn auth_state() -> Arc<AuthState> {
        let config = AuthConfig::new("https://manzil.app".to_string());
        Arc::new(AuthState::new(
            config,
            &SecretString::from("test-secret"),
            Arc::new(LogEmailSender),
            Arc::new(NoopRateLimiter),
        ))
    }

    #[tokio::test]
    async fn login_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = login(HeaderMap::new(), Extension(pool), Extension(auth_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn login_empty_fields() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = login(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(LoginRequest {
                phone: " ".to_string(),
                password: "Abcdef12".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn admin_login_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = admin_login(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}

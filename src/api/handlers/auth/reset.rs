//! Password establishment, forgot/reset, and authenticated change.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::email::EmailMessage;
use crate::api::error::{ApiError, ErrorBody};

use super::guard::authenticate;
use super::password::{hash_password_blocking, verify_password_blocking};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::issue_session;
use super::state::AuthState;
use super::storage::{
    clear_reset_otp, find_account_by_email, set_password as store_password, store_reset_otp,
};
use super::types::{
    ForgotPasswordRequest, MessageResponse, ResetPasswordRequest, SetPasswordRequest,
    TokenResponse, UpdatePasswordRequest,
};
use super::utils::{
    extract_client_ip, generate_otp, hash_otp, normalize_email, otp_matches, valid_email,
    valid_password,
};

fn validate_new_password(password: &str, confirm_password: &str) -> Result<(), ApiError> {
    if password.is_empty() || confirm_password.is_empty() {
        return Err(ApiError::Validation(
            "Please provide all required fields".to_string(),
        ));
    }
    if password != confirm_password {
        return Err(ApiError::Validation("Passwords are not the same".to_string()));
    }
    if !valid_password(password) {
        return Err(ApiError::Validation(
            "Password must have at least one capital letter, one number, and be at least 8 characters long"
                .to_string(),
        ));
    }
    Ok(())
}

/// Establish the first password for a verified account and log the user in.
#[utoipa::path(
    post,
    path = "/v1/auth/set-password",
    request_body = SetPasswordRequest,
    responses(
        (status = 200, description = "Password set, session issued", body = TokenResponse),
        (status = 400, description = "Invalid input or account state", body = ErrorBody),
        (status = 404, description = "No account with that email", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn set_password(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SetPasswordRequest>>,
) -> Result<Response, ApiError> {
    let request: SetPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return Err(ApiError::Validation("Missing payload".to_string())),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::Validation(
            "Please provide a valid email".to_string(),
        ));
    }
    validate_new_password(&request.password, &request.confirm_password)?;

    let mut account = find_account_by_email(&pool, &email)
        .await?
        .ok_or_else(|| ApiError::NotFound("No account with that email address".to_string()))?;

    if !account.is_verified {
        return Err(ApiError::Validation(
            "Account is not verified yet".to_string(),
        ));
    }
    if account.is_password_set {
        return Err(ApiError::Validation(
            "Password is already set; use password reset".to_string(),
        ));
    }

    let password_phc = hash_password_blocking(request.password).await?;
    store_password(&pool, account.id, &password_phc).await?;

    // Establishing a password logs the user in.
    account.is_password_set = true;
    issue_session(&auth_state, account)
}

/// Start a password reset by emailing a one-time code.
#[utoipa::path(
    post,
    path = "/v1/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset code sent to email", body = MessageResponse),
        (status = 404, description = "No account with that email", body = ErrorBody),
        (status = 500, description = "Email dispatch failed", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<Response, ApiError> {
    let request: ForgotPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return Err(ApiError::Validation("Missing payload".to_string())),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::Validation(
            "Please provide a valid email".to_string(),
        ));
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ForgotPassword)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::ForgotPassword)
            == RateLimitDecision::Limited
    {
        return Ok((StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response());
    }

    let account = find_account_by_email(&pool, &email)
        .await?
        .ok_or_else(|| ApiError::NotFound("There is no user with that email address".to_string()))?;

    let otp = generate_otp();
    let otp_hash = hash_otp(&otp);
    store_reset_otp(
        &pool,
        account.id,
        &otp_hash,
        auth_state.config().reset_otp_ttl_seconds(),
    )
    .await?;

    let message = EmailMessage {
        to_email: email,
        subject: "Your password reset code (valid for 10 min)".to_string(),
        body: format!(
            "Forgot your password? Your reset code is {otp}. \
             If you didn't forget your password, please ignore this email!"
        ),
    };

    // Unlike signup, the send is awaited: a reset window must not linger if
    // the code never reached the user.
    if let Err(err) = auth_state.email().send(&message).await {
        clear_reset_otp(&pool, account.id).await?;
        return Err(ApiError::Internal(
            err.context("failed to send password reset email"),
        ));
    }

    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("Reset code sent to email")),
    )
        .into_response())
}

/// Complete a password reset with the emailed code; issues a fresh session.
#[utoipa::path(
    post,
    path = "/v1/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset, session issued", body = TokenResponse),
        (status = 400, description = "Invalid or expired reset code", body = ErrorBody),
        (status = 404, description = "No account with that email", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<Response, ApiError> {
    let request: ResetPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return Err(ApiError::Validation("Missing payload".to_string())),
    };

    let email = normalize_email(&request.email);
    let otp = request.otp.trim();
    if !valid_email(&email) || otp.is_empty() {
        return Err(ApiError::Validation(
            "Please provide all required fields".to_string(),
        ));
    }
    validate_new_password(&request.password, &request.confirm_password)?;

    let mut account = find_account_by_email(&pool, &email)
        .await?
        .ok_or_else(|| ApiError::NotFound("No account with that email address".to_string()))?;

    match (
        account.password_reset_hash.as_deref(),
        account.password_reset_expires_at,
    ) {
        (Some(stored_hash), Some(expires_at)) => {
            if expires_at < Utc::now() {
                clear_reset_otp(&pool, account.id).await?;
                return Err(ApiError::Expired("Reset code has expired".to_string()));
            }
            if !otp_matches(otp, stored_hash) {
                return Err(ApiError::Validation("Invalid reset code".to_string()));
            }
        }
        _ => return Err(ApiError::Expired("Reset code has expired".to_string())),
    }

    let password_phc = hash_password_blocking(request.password).await?;
    // Clears reset material and bumps password_changed_at, which invalidates
    // every previously issued token.
    store_password(&pool, account.id, &password_phc).await?;

    account.is_password_set = true;
    issue_session(&auth_state, account)
}

/// Change the password of the authenticated account; issues a fresh session.
#[utoipa::path(
    patch,
    path = "/v1/auth/update-password",
    request_body = UpdatePasswordRequest,
    responses(
        (status = 200, description = "Password updated, session issued", body = TokenResponse),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 401, description = "Not logged in or wrong current password", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn update_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<UpdatePasswordRequest>>,
) -> Result<Response, ApiError> {
    let account = authenticate(&headers, &pool, &auth_state).await?;

    let request: UpdatePasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return Err(ApiError::Validation("Missing payload".to_string())),
    };

    validate_new_password(&request.password, &request.confirm_password)?;

    let Some(stored_phc) = account.password_hash.clone() else {
        return Err(ApiError::Unauthorized(
            "Your current password is wrong".to_string(),
        ));
    };
    if !verify_password_blocking(request.password_current, stored_phc).await? {
        return Err(ApiError::Unauthorized(
            "Your current password is wrong".to_string(),
        ));
    }

    let password_phc = hash_password_blocking(request.password).await?;
    store_password(&pool, account.id, &password_phc).await?;

    issue_session(&auth_state, account)
}

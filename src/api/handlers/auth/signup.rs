//! Signup and OTP verification endpoints.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::api::email::EmailMessage;
use crate::api::error::{ApiError, ErrorBody};

use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::{
    clear_signup_otp, find_account_by_email, insert_account_with_otp, mark_verified,
    store_signup_otp, SignupOutcome,
};
use super::types::{MessageResponse, ResendOtpRequest, SignupRequest, VerifyOtpRequest};
use super::utils::{
    extract_client_ip, generate_otp, hash_otp, normalize_email, otp_matches, valid_email,
    valid_phone,
};

/// The OTP is durable before this returns; delivery happens out-of-band and
/// a lost email only costs the user a resend.
fn dispatch_otp_email(auth_state: &AuthState, to_email: String, otp: String, subject: &str) {
    let sender = auth_state.email().clone();
    let message = EmailMessage {
        to_email,
        subject: subject.to_string(),
        body: format!("Your OTP is {otp}"),
    };
    tokio::spawn(async move {
        if let Err(err) = sender.send(&message).await {
            error!("failed to send OTP email: {err:#}");
        }
    });
}

/// Create an unverified, passwordless account and email a one-time code.
#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "OTP sent to email", body = MessageResponse),
        (status = 400, description = "Invalid input or duplicate email/phone", body = ErrorBody),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
pub async fn signup(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> Result<Response, ApiError> {
    let request: SignupRequest = match payload {
        Some(Json(payload)) => payload,
        None => return Err(ApiError::Validation("Missing payload".to_string())),
    };

    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::Validation(
            "Please provide all required fields".to_string(),
        ));
    }
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::Validation(
            "Please provide a valid email".to_string(),
        ));
    }
    let phone = request.phone.trim().to_string();
    if !valid_phone(&phone) {
        return Err(ApiError::Validation(
            "Please provide a valid phone number".to_string(),
        ));
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Signup)
        == RateLimitDecision::Limited
    {
        return Ok((StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response());
    }

    let otp = generate_otp();
    let otp_hash = hash_otp(&otp);

    // Account creation and OTP persistence are a single write; no partial
    // account can exist without a pending verification.
    match insert_account_with_otp(
        &pool,
        &name,
        &email,
        &phone,
        &otp_hash,
        auth_state.config().otp_ttl_seconds(),
    )
    .await?
    {
        SignupOutcome::Conflict => {
            return Err(ApiError::Conflict(
                "An account with that email or phone already exists".to_string(),
            ))
        }
        SignupOutcome::Created => {}
    }

    dispatch_otp_email(&auth_state, email, otp, "Your OTP Code");

    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("OTP sent to email")),
    )
        .into_response())
}

/// Verify a pending one-time code and activate the account.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Invalid or expired OTP", body = ErrorBody),
        (status = 404, description = "No account with that email", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn verify_otp(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> Result<Response, ApiError> {
    let request: VerifyOtpRequest = match payload {
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

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::VerifyOtp)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::VerifyOtp)
            == RateLimitDecision::Limited
    {
        return Ok((StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response());
    }

    let account = find_account_by_email(&pool, &email)
        .await?
        .ok_or_else(|| ApiError::NotFound("No account with that email address".to_string()))?;

    match (account.otp_hash.as_deref(), account.otp_expires_at) {
        (Some(stored_hash), Some(expires_at)) => {
            if expires_at < Utc::now() {
                // Observed expiry consumes the code: wipe it so it can
                // never match later.
                clear_signup_otp(&pool, account.id).await?;
                return Err(ApiError::Expired("OTP has expired".to_string()));
            }
            if !otp_matches(otp, stored_hash) {
                return Err(ApiError::Validation("Invalid OTP".to_string()));
            }
            mark_verified(&pool, account.id).await?;
            Ok((
                StatusCode::OK,
                Json(MessageResponse::new("Email verified successfully")),
            )
                .into_response())
        }
        _ => Err(ApiError::Expired("OTP has expired".to_string())),
    }
}

/// Issue a fresh one-time code for an existing unverified account.
#[utoipa::path(
    post,
    path = "/v1/auth/resend-otp",
    request_body = ResendOtpRequest,
    responses(
        (status = 200, description = "OTP sent to email", body = MessageResponse),
        (status = 400, description = "Account already verified", body = ErrorBody),
        (status = 404, description = "No account with that email", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn resend_otp(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResendOtpRequest>>,
) -> Result<Response, ApiError> {
    let request: ResendOtpRequest = match payload {
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
        .check_ip(client_ip.as_deref(), RateLimitAction::Signup)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::Signup)
            == RateLimitDecision::Limited
    {
        return Ok((StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response());
    }

    let account = find_account_by_email(&pool, &email)
        .await?
        .ok_or_else(|| ApiError::NotFound("No account with that email address".to_string()))?;

    if account.is_verified {
        return Err(ApiError::Validation(
            "Account is already verified".to_string(),
        ));
    }

    let otp = generate_otp();
    let otp_hash = hash_otp(&otp);
    store_signup_otp(
        &pool,
        account.id,
        &otp_hash,
        auth_state.config().otp_ttl_seconds(),
    )
    .await?;

    dispatch_otp_email(&auth_state, email, otp, "Your OTP Code");

    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("OTP sent to email")),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::NoopRateLimiter;
    use super::super::state::{AuthConfig, AuthState};
    use super::{signup, verify_otp, SignupRequest, VerifyOtpRequest};
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
    async fn signup_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = signup(HeaderMap::new(), Extension(pool), Extension(auth_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn signup_rejects_invalid_email() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = signup(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(SignupRequest {
                name: "Alice".to_string(),
                email: "not-an-email".to_string(),
                phone: "+15550001111".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn signup_rejects_invalid_phone() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = signup(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(SignupRequest {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                phone: "123".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn verify_otp_empty_fields() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = verify_otp(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(VerifyOtpRequest {
                email: "alice@example.com".to_string(),
                otp: " ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}

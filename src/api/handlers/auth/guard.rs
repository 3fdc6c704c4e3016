//! Request guard for protected routes.
//!
//! Checks run in a fixed order: token present, not revoked, signature and
//! expiry valid, account still exists, and not issued before the last
//! password change. Only after all five does the account reach a handler.

use axum::http::HeaderMap;
use sqlx::PgPool;
use uuid::Uuid;

use crate::api::error::ApiError;

use super::session::extract_session_token;
use super::state::AuthState;
use super::storage::{find_account_by_id, token_revoked, AccountRecord};
use super::types::Role;
use super::utils::hash_token;

pub(crate) async fn authenticate(
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
) -> Result<AccountRecord, ApiError> {
    let Some(token) = extract_session_token(headers) else {
        return Err(ApiError::Unauthorized(
            "You are not logged in! Please log in to get access.".to_string(),
        ));
    };

    // Revocation is checked before signature verification so a logged-out
    // token is rejected even while cryptographically valid.
    if token_revoked(pool, &hash_token(&token)).await? {
        return Err(ApiError::Unauthorized(
            "Token is no longer valid! Please log in again.".to_string(),
        ));
    }

    let claims = auth_state.tokens().verify(&token).map_err(|_| {
        ApiError::Unauthorized("Invalid token! Please log in again.".to_string())
    })?;

    let account_id = Uuid::parse_str(&claims.sub).map_err(|_| {
        ApiError::Unauthorized("Invalid token! Please log in again.".to_string())
    })?;

    let Some(account) = find_account_by_id(pool, account_id).await? else {
        return Err(ApiError::Unauthorized(
            "The account belonging to this token no longer exists.".to_string(),
        ));
    };

    if password_changed_after(&account, claims.iat) {
        return Err(ApiError::Unauthorized(
            "Password was recently changed! Please log in again.".to_string(),
        ));
    }

    Ok(account)
}

/// A token issued strictly before the last password change is dead.
pub(crate) fn password_changed_after(account: &AccountRecord, token_issued_at: i64) -> bool {
    account
        .password_changed_at
        .is_some_and(|changed_at| token_issued_at < changed_at.timestamp())
}

pub(crate) fn require_role(account: &AccountRecord, role: Role) -> Result<(), ApiError> {
    if account.role == role {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "You do not have permission to perform this action".to_string(),
        ))
    }
}

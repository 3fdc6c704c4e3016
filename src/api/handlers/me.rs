//! Profile endpoint for the authenticated account.

use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::error::{ApiError, ErrorBody};

use super::auth::guard::authenticate;
use super::auth::types::AccountProfile;
use super::auth::AuthState;

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Authenticated account profile", body = AccountProfile),
        (status = 401, description = "Not logged in", body = ErrorBody)
    ),
    tag = "me"
)]
pub async fn me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    let account = authenticate(&headers, &pool, &auth_state).await?;

    Ok(Json(AccountProfile::from(account)).into_response())
}

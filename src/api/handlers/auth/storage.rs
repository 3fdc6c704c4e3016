//! Database helpers for accounts and the token revocation list.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::types::Role;
use super::utils::is_unique_violation;

/// Outcome when attempting to create a new account.
#[derive(Debug)]
pub(super) enum SignupOutcome {
    Created,
    Conflict,
}

/// One account row; credential material stays inside this module and the
/// auth handlers, it is never serialized to clients.
pub(crate) struct AccountRecord {
    pub(crate) id: Uuid,
    pub(crate) name: String,
    pub(crate) email: String,
    pub(crate) phone: String,
    pub(crate) role: Role,
    pub(crate) password_hash: Option<String>,
    pub(crate) is_password_set: bool,
    pub(crate) is_verified: bool,
    pub(crate) otp_hash: Option<Vec<u8>>,
    pub(crate) otp_expires_at: Option<DateTime<Utc>>,
    pub(crate) password_reset_hash: Option<Vec<u8>>,
    pub(crate) password_reset_expires_at: Option<DateTime<Utc>>,
    pub(crate) password_changed_at: Option<DateTime<Utc>>,
}

impl AccountRecord {
    /// Login eligibility per the account lifecycle: verified, password set,
    /// and a hash actually present.
    pub(crate) fn login_eligible(&self) -> bool {
        self.is_verified && self.is_password_set && self.password_hash.is_some()
    }
}

const ACCOUNT_COLUMNS: &str = r"
        id, name, email, phone, role, password_hash,
        is_password_set, is_verified,
        otp_hash, otp_expires_at,
        password_reset_hash, password_reset_expires_at,
        password_changed_at
";

fn account_from_row(row: &PgRow) -> Result<AccountRecord> {
    let role: String = row.get("role");
    Ok(AccountRecord {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
        role: Role::parse(&role)?,
        password_hash: row.get("password_hash"),
        is_password_set: row.get("is_password_set"),
        is_verified: row.get("is_verified"),
        otp_hash: row.get("otp_hash"),
        otp_expires_at: row.get("otp_expires_at"),
        password_reset_hash: row.get("password_reset_hash"),
        password_reset_expires_at: row.get("password_reset_expires_at"),
        password_changed_at: row.get("password_changed_at"),
    })
}

pub(super) async fn find_account_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<AccountRecord>> {
    let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup account by email")?;

    row.as_ref().map(account_from_row).transpose()
}

pub(super) async fn find_account_by_phone(
    pool: &PgPool,
    phone: &str,
) -> Result<Option<AccountRecord>> {
    let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE phone = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(phone)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup account by phone")?;

    row.as_ref().map(account_from_row).transpose()
}

pub(crate) async fn find_account_by_id(
    pool: &PgPool,
    account_id: Uuid,
) -> Result<Option<AccountRecord>> {
    let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(account_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup account by id")?;

    row.as_ref().map(account_from_row).transpose()
}

/// Create an unverified, passwordless account with its first OTP in a single
/// write, so no partial account can exist without pending verification.
pub(super) async fn insert_account_with_otp(
    pool: &PgPool,
    name: &str,
    email: &str,
    phone: &str,
    otp_hash: &[u8],
    otp_ttl_seconds: i64,
) -> Result<SignupOutcome> {
    let query = r"
        INSERT INTO accounts
            (name, email, phone, otp_hash, otp_expires_at)
        VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(name)
        .bind(email)
        .bind(phone)
        .bind(otp_hash)
        .bind(otp_ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await;

    match result {
        Ok(_) => Ok(SignupOutcome::Created),
        Err(err) if is_unique_violation(&err) => Ok(SignupOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert account"),
    }
}

/// Store a fresh signup OTP, replacing any pending one.
pub(super) async fn store_signup_otp(
    pool: &PgPool,
    account_id: Uuid,
    otp_hash: &[u8],
    otp_ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        UPDATE accounts
        SET otp_hash = $2,
            otp_expires_at = NOW() + ($3 * INTERVAL '1 second'),
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(otp_hash)
        .bind(otp_ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to store signup OTP")?;
    Ok(())
}

/// Wipe pending OTP material; used when expiry is observed.
pub(super) async fn clear_signup_otp(pool: &PgPool, account_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE accounts
        SET otp_hash = NULL,
            otp_expires_at = NULL,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to clear signup OTP")?;
    Ok(())
}

/// Consume the OTP: mark verified and wipe the fingerprint in one statement.
pub(super) async fn mark_verified(pool: &PgPool, account_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE accounts
        SET is_verified = TRUE,
            otp_hash = NULL,
            otp_expires_at = NULL,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to mark account verified")?;
    Ok(())
}

pub(super) async fn store_reset_otp(
    pool: &PgPool,
    account_id: Uuid,
    otp_hash: &[u8],
    ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        UPDATE accounts
        SET password_reset_hash = $2,
            password_reset_expires_at = NOW() + ($3 * INTERVAL '1 second'),
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(otp_hash)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to store reset OTP")?;
    Ok(())
}

/// Wipe reset material; used on email failure and observed expiry so no
/// stale reset window lingers.
pub(super) async fn clear_reset_otp(pool: &PgPool, account_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE accounts
        SET password_reset_hash = NULL,
            password_reset_expires_at = NULL,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to clear reset OTP")?;
    Ok(())
}

/// Write a new password hash.
///
/// Clears any pending OTP/reset material and bumps `password_changed_at`
/// (backdated one second so the token issued for this very request stays
/// valid). Every token issued earlier is rejected by the guard afterwards.
pub(super) async fn set_password(pool: &PgPool, account_id: Uuid, password_phc: &str) -> Result<()> {
    let query = r"
        UPDATE accounts
        SET password_hash = $2,
            is_password_set = TRUE,
            otp_hash = NULL,
            otp_expires_at = NULL,
            password_reset_hash = NULL,
            password_reset_expires_at = NULL,
            password_changed_at = NOW() - INTERVAL '1 second',
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(password_phc)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to set password")?;
    Ok(())
}

/// Record a revoked token until its natural expiry. Idempotent.
pub(crate) async fn revoke_token(
    pool: &PgPool,
    token_hash: &[u8],
    expires_at: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        INSERT INTO revoked_tokens (token_hash, expires_at)
        VALUES ($1, $2)
        ON CONFLICT (token_hash) DO NOTHING
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .bind(expires_at)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke token")?;
    Ok(())
}

/// Revocation check consulted by the guard before trusting a signature.
pub(crate) async fn token_revoked(pool: &PgPool, token_hash: &[u8]) -> Result<bool> {
    let query = r"
        SELECT 1 AS present
        FROM revoked_tokens
        WHERE token_hash = $1
          AND expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check token revocation")?;
    Ok(row.is_some())
}

/// Delete revocation rows whose tokens have naturally expired.
pub(crate) async fn purge_expired_revocations(pool: &PgPool) -> Result<u64> {
    let query = "DELETE FROM revoked_tokens WHERE expires_at <= NOW()";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to purge expired revocations")?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_outcome_debug_names() {
        assert_eq!(format!("{:?}", SignupOutcome::Created), "Created");
        assert_eq!(format!("{:?}", SignupOutcome::Conflict), "Conflict");
    }

    fn record(is_verified: bool, is_password_set: bool, has_hash: bool) -> AccountRecord {
        AccountRecord {
            id: Uuid::nil(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            phone: "+15550001111".to_string(),
            role: Role::User,
            password_hash: has_hash.then(|| "$argon2id$stub".to_string()),
            is_password_set,
            is_verified,
            otp_hash: None,
            otp_expires_at: None,
            password_reset_hash: None,
            password_reset_expires_at: None,
            password_changed_at: None,
        }
    }

    #[test]
    fn login_eligible_requires_all_three() {
        assert!(record(true, true, true).login_eligible());
        assert!(!record(false, true, true).login_eligible());
        assert!(!record(true, false, true).login_eligible());
        assert!(!record(true, true, false).login_eligible());
    }
}

//! Password hashing (argon2, salted) with the work moved off the executor.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Hash a password into a PHC string with a fresh random salt.
pub(super) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

/// Verify a candidate password against a stored PHC string.
/// Malformed stored hashes count as a mismatch.
pub(super) fn verify_password(password: &str, stored_phc: &str) -> bool {
    PasswordHash::new(stored_phc).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Hashing is CPU-bound; run it on the blocking pool so request handling
/// is not stalled.
pub(super) async fn hash_password_blocking(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("password hashing task failed")?
}

pub(super) async fn verify_password_blocking(password: String, stored_phc: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored_phc))
        .await
        .context("password verification task failed")
}

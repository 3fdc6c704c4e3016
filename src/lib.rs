//! # Manzil (Account Credential & Verification Service)
//!
//! `manzil` is the account authority for the Manzil home-services platform.
//! It owns the transition of an account through
//! unverified → OTP-verified → password-set → authenticated states, plus
//! OTP-based password reset and session token issuance/revocation.
//!
//! ## Verification (OTP)
//!
//! Signup creates an unverified, passwordless account and emails a 6-digit
//! one-time code. Only a SHA-256 fingerprint of the code is stored, together
//! with a short expiry. Codes are single-use: the stored fingerprint is wiped
//! on successful verification and on observed expiry.
//!
//! ## Sessions
//!
//! Sessions are HS256 JWTs with a fixed TTL, delivered both in the response
//! body and as an `HttpOnly` cookie. Logout records the token's SHA-256
//! fingerprint in `revoked_tokens` until the token's natural expiry; the
//! request guard consults that table before trusting a signature. Any
//! password change bumps `password_changed_at`, which invalidates every
//! token issued before it.
//!
//! ## Authorization
//!
//! Roles form a closed set (`user`, `admin`). Admin-only routes run the same
//! guard and then require `admin`, returning `403 Forbidden` on mismatch.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        // Should be a hex string (full SHA-1 is 40 chars, but could be short)
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}

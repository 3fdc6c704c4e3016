//! Small helpers for auth validation, OTP generation, and token fingerprints.

use rand::{rngs::OsRng, Rng};
use regex::Regex;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Normalize an email for lookup/uniqueness checks.
pub(super) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(super) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Phone numbers: optional leading `+`, then 7 to 15 digits.
pub(super) fn valid_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

/// Passwords: at least 8 alphanumeric characters with one uppercase letter
/// and one digit.
pub(super) fn valid_password(password: &str) -> bool {
    password.len() >= 8
        && password.chars().all(|c| c.is_ascii_alphanumeric())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
}

/// Create a new 6-digit one-time code.
///
/// The code is only sent to the user; we store a fingerprint.
pub(super) fn generate_otp() -> String {
    let code: u32 = OsRng.gen_range(100_000..=999_999);
    code.to_string()
}

/// Fingerprint an OTP so the raw code never touches the database.
/// A fast unkeyed hash is enough: codes are single-use with a short TTL.
pub(super) fn hash_otp(otp: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(otp.as_bytes());
    hasher.finalize().to_vec()
}

/// Compare a candidate OTP against a stored fingerprint in constant time.
pub(super) fn otp_matches(otp: &str, stored_hash: &[u8]) -> bool {
    hash_otp(otp).ct_eq(stored_hash).into()
}

/// Fingerprint a session token for the revocation list.
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Extract a client IP for rate limiting from common proxy headers.
pub(super) fn extract_client_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn valid_phone_accepts_digits_with_plus() {
        assert!(valid_phone("+15550001111"));
        assert!(valid_phone("5550001"));
    }

    #[test]
    fn valid_phone_rejects_short_or_alpha() {
        assert!(!valid_phone("123"));
        assert!(!valid_phone("+1-555-000-1111"));
        assert!(!valid_phone("phone"));
    }

    #[test]
    fn valid_password_enforces_rules() {
        assert!(valid_password("Abcdef12"));
        assert!(!valid_password("abcdef12")); // no uppercase
        assert!(!valid_password("Abcdefgh")); // no digit
        assert!(!valid_password("Abc12")); // too short
        assert!(!valid_password("Abcdef12!")); // non-alphanumeric
    }

    #[test]
    fn generate_otp_is_six_digits() {
        for _ in 0..32 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn hash_otp_stable() {
        let first = hash_otp("123456");
        let second = hash_otp("123456");
        let different = hash_otp("654321");
        assert_eq!(first, second);
        assert_ne!(first, different);
    }

    #[test]
    fn otp_matches_compares_fingerprints() {
        let stored = hash_otp("123456");
        assert!(otp_matches("123456", &stored));
        assert!(!otp_matches("654321", &stored));
    }

    #[test]
    fn hash_token_stable() {
        assert_eq!(hash_token("token"), hash_token("token"));
        assert_ne!(hash_token("token"), hash_token("other"));
    }

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
    }

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));
    }

    #[test]
    fn extract_client_ip_none_when_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), None);
    }
}

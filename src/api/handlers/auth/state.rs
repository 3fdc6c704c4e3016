//! Auth state and configuration.

use secrecy::SecretString;
use std::sync::Arc;

use super::rate_limit::RateLimiter;
use super::tokens::TokenService;
use crate::api::email::EmailSender;

const DEFAULT_OTP_TTL_SECONDS: i64 = 2 * 60;
const DEFAULT_RESET_OTP_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    otp_ttl_seconds: i64,
    reset_otp_ttl_seconds: i64,
    session_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            reset_otp_ttl_seconds: DEFAULT_RESET_OTP_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: i64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_otp_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(super) fn otp_ttl_seconds(&self) -> i64 {
        self.otp_ttl_seconds
    }

    pub(super) fn reset_otp_ttl_seconds(&self) -> i64 {
        self.reset_otp_ttl_seconds
    }

    pub(crate) fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    pub(super) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    tokens: TokenService,
    email: Arc<dyn EmailSender>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        jwt_secret: &SecretString,
        email: Arc<dyn EmailSender>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            config,
            tokens: TokenService::new(jwt_secret),
            email,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(super) fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub(super) fn email(&self) -> &Arc<dyn EmailSender> {
        &self.email
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::{NoopRateLimiter, RateLimiter};
    use super::*;
    use crate::api::email::LogEmailSender;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://manzil.app".to_string());

        assert_eq!(config.frontend_base_url(), "https://manzil.app");
        assert_eq!(config.otp_ttl_seconds(), super::DEFAULT_OTP_TTL_SECONDS);
        assert_eq!(
            config.reset_otp_ttl_seconds(),
            super::DEFAULT_RESET_OTP_TTL_SECONDS
        );
        assert_eq!(
            config.session_ttl_seconds(),
            super::DEFAULT_SESSION_TTL_SECONDS
        );
        assert!(config.session_cookie_secure());

        let config = config
            .with_otp_ttl_seconds(60)
            .with_reset_otp_ttl_seconds(300)
            .with_session_ttl_seconds(3600);

        assert_eq!(config.otp_ttl_seconds(), 60);
        assert_eq!(config.reset_otp_ttl_seconds(), 300);
        assert_eq!(config.session_ttl_seconds(), 3600);
    }

    #[test]
    fn plain_http_frontend_disables_secure_cookie() {
        let config = AuthConfig::new("http://localhost:3000".to_string());
        assert!(!config.session_cookie_secure());
    }

    #[test]
    fn auth_state_constructs_with_noop_rate_limiter() {
        let config = AuthConfig::new("https://manzil.app".to_string());
        let limiter: Arc<dyn RateLimiter> = Arc::new(NoopRateLimiter);
        let state = AuthState::new(
            config,
            &SecretString::from("test-secret"),
            Arc::new(LogEmailSender),
            limiter,
        );
        assert_eq!(state.config().frontend_base_url(), "https://manzil.app");
    }
}

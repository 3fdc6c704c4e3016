use secrecy::SecretString;

/// Arguments shared across actions, resolved once at startup.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub jwt_secret: SecretString,
    pub frontend_base_url: String,
    pub email_relay_url: Option<String>,
    pub email_from: String,
    pub session_ttl_seconds: i64,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(jwt_secret: SecretString, frontend_base_url: String) -> Self {
        Self {
            jwt_secret,
            frontend_base_url,
            email_relay_url: None,
            email_from: String::new(),
            session_ttl_seconds: 0,
        }
    }
}

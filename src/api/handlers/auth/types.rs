//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::storage::AccountRecord;

/// Closed role set; every consumer matches exhaustively.
#[derive(ToSchema, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    /// Parse a stored role string; unknown values are a data error.
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(anyhow::anyhow!("unknown role: {other}")),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResendOtpRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SetPasswordRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub phone: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UpdatePasswordRequest {
    pub password_current: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub(crate) fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Account as returned to clients; credential material never appears here.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AccountProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub role: Role,
    pub is_verified: bool,
}

impl From<AccountRecord> for AccountProfile {
    fn from(record: AccountRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            email: record.email,
            phone: record.phone,
            role: record.role,
            is_verified: record.is_verified,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub token: String,
    pub account: AccountProfile,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn role_serializes_lowercase() -> Result<()> {
        assert_eq!(serde_json::to_value(Role::User)?, "user");
        assert_eq!(serde_json::to_value(Role::Admin)?, "admin");
        Ok(())
    }

    #[test]
    fn role_parse_round_trips() -> Result<()> {
        assert_eq!(Role::parse("user")?, Role::User);
        assert_eq!(Role::parse("admin")?, Role::Admin);
        assert!(Role::parse("root").is_err());
        Ok(())
    }

    #[test]
    fn signup_request_round_trips() -> Result<()> {
        let request = SignupRequest {
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            phone: "+15550001111".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let email = value
            .get("email")
            .and_then(serde_json::Value::as_str)
            .context("missing email")?;
        assert_eq!(email, "alice@example.com");
        let decoded: SignupRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.phone, "+15550001111");
        Ok(())
    }

    #[test]
    fn profile_has_no_credential_fields() -> Result<()> {
        let profile = AccountProfile {
            id: Uuid::nil(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            phone: "+15550001111".to_string(),
            role: Role::User,
            is_verified: true,
        };
        let value = serde_json::to_value(&profile)?;
        let object = value.as_object().context("expected object")?;
        assert!(!object.contains_key("password"));
        assert!(!object.contains_key("password_hash"));
        assert!(!object.contains_key("otp_hash"));
        Ok(())
    }
}

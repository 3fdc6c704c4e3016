//! OpenAPI document for the service; served by swagger-ui in api::serve.

use utoipa::OpenApi;

use crate::api::error::ErrorBody;
use crate::api::handlers::auth::types::{
    AccountProfile, ForgotPasswordRequest, LoginRequest, MessageResponse, ResendOtpRequest,
    ResetPasswordRequest, Role, SetPasswordRequest, SignupRequest, TokenResponse,
    UpdatePasswordRequest, VerifyOtpRequest,
};
use crate::api::handlers::health::Health;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::handlers::health::health,
        crate::api::handlers::me::me,
        crate::api::handlers::auth::signup::signup,
        crate::api::handlers::auth::signup::verify_otp,
        crate::api::handlers::auth::signup::resend_otp,
        crate::api::handlers::auth::reset::set_password,
        crate::api::handlers::auth::login::login,
        crate::api::handlers::auth::login::admin_login,
        crate::api::handlers::auth::reset::forgot_password,
        crate::api::handlers::auth::reset::reset_password,
        crate::api::handlers::auth::reset::update_password,
        crate::api::handlers::auth::session::logout,
    ),
    components(schemas(
        AccountProfile,
        ErrorBody,
        ForgotPasswordRequest,
        Health,
        LoginRequest,
        MessageResponse,
        ResendOtpRequest,
        ResetPasswordRequest,
        Role,
        SetPasswordRequest,
        SignupRequest,
        TokenResponse,
        UpdatePasswordRequest,
        VerifyOtpRequest,
    )),
    tags(
        (name = "auth", description = "Account lifecycle: signup, OTP verification, passwords, sessions"),
        (name = "me", description = "Authenticated account"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_all_routes() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for expected in [
            "/health",
            "/v1/me",
            "/v1/auth/signup",
            "/v1/auth/verify-otp",
            "/v1/auth/resend-otp",
            "/v1/auth/set-password",
            "/v1/auth/login",
            "/v1/auth/admin/login",
            "/v1/auth/forgot-password",
            "/v1/auth/reset-password",
            "/v1/auth/update-password",
            "/v1/auth/logout",
        ] {
            assert!(
                paths.iter().any(|path| path.as_str() == expected),
                "missing path: {expected}"
            );
        }
    }
}

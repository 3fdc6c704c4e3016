use crate::{
    api::handlers::{auth, health, me, root},
    cli::globals::GlobalArgs,
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, patch, post},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::sleep};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// Keep these internal to the crate while allowing CLI/server wiring to reference them.
pub(crate) mod email;
pub mod error;
pub(crate) mod handlers;
// OpenAPI document and schema registration live in openapi.rs.
mod openapi;

pub use openapi::ApiDoc;

/// How often the expired-revocation sweep runs.
const REVOCATION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn serve(port: u16, dsn: String, globals: &GlobalArgs) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let email_sender: Arc<dyn email::EmailSender> = match &globals.email_relay_url {
        Some(relay_url) => Arc::new(email::HttpEmailSender::new(
            relay_url.clone(),
            globals.email_from.clone(),
        )?),
        None => Arc::new(email::LogEmailSender),
    };

    let auth_config = auth::AuthConfig::new(globals.frontend_base_url.clone())
        .with_session_ttl_seconds(globals.session_ttl_seconds);
    let auth_state = Arc::new(auth::AuthState::new(
        auth_config,
        &globals.jwt_secret,
        email_sender,
        Arc::new(auth::NoopRateLimiter),
    ));

    // Background task deletes revocation rows once the tokens they block
    // would have expired on their own.
    spawn_revocation_sweeper(pool.clone(), REVOCATION_SWEEP_INTERVAL);

    let frontend_origin = frontend_origin(auth_state.config().frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let app = Router::new()
        .route("/", get(root::root))
        .route("/health", get(health::health))
        .route("/v1/auth/signup", post(auth::signup::signup))
        .route("/v1/auth/verify-otp", post(auth::signup::verify_otp))
        .route("/v1/auth/resend-otp", post(auth::signup::resend_otp))
        .route("/v1/auth/set-password", post(auth::reset::set_password))
        .route("/v1/auth/login", post(auth::login::login))
        .route("/v1/auth/admin/login", post(auth::login::admin_login))
        .route("/v1/auth/forgot-password", post(auth::reset::forgot_password))
        .route("/v1/auth/reset-password", post(auth::reset::reset_password))
        .route(
            "/v1/auth/update-password",
            patch(auth::reset::update_password),
        )
        .route("/v1/auth/logout", post(auth::session::logout))
        .route("/v1/me", get(me::me))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state.clone()))
                .layer(Extension(pool.clone())),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn spawn_revocation_sweeper(pool: PgPool, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match auth::purge_expired_revocations(&pool).await {
                Ok(0) => {}
                Ok(purged) => info!("purged {purged} expired revoked tokens"),
                Err(err) => error!("revoked token sweep failed: {err}"),
            }

            sleep(interval).await;
        }
    })
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_origin_strips_path() -> Result<()> {
        let origin = frontend_origin("https://manzil.app/app/")?;
        assert_eq!(origin, "https://manzil.app");
        Ok(())
    }

    #[test]
    fn frontend_origin_keeps_port() -> Result<()> {
        let origin = frontend_origin("http://localhost:3000")?;
        assert_eq!(origin, "http://localhost:3000");
        Ok(())
    }

    #[test]
    fn frontend_origin_rejects_garbage() {
        assert!(frontend_origin("not a url").is_err());
    }
}

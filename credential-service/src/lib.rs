pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    security_headers_middleware, tracing::request_id_middleware, REQUEST_ID_HEADER,
};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{net::TcpListener, sync::Notify};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::config::CredentialConfig;
use crate::middleware::{auth_middleware, rate_limit_middleware, RatePolicy};
use crate::services::{
    AuthenticationGuard, CredentialService, EmailProvider, EphemeralStore, RateLimiter,
    TokenCodec, UserCache, UserStore,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::auth::signup,
        handlers::auth::login,
        handlers::auth::refresh_token,
        handlers::auth::logout,
        handlers::mailing::confirm_email,
        handlers::mailing::send_confirm_email,
        handlers::mailing::send_reset_password_email,
        handlers::mailing::reset_password,
        handlers::user::get_me,
        handlers::user::set_password,
        handlers::user::set_avatar,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::SignupRequest,
            dtos::auth::SignupResponse,
            dtos::auth::LoginRequest,
            dtos::auth::EmailRequest,
            dtos::auth::ResetPasswordRequest,
            dtos::user::SetPasswordRequest,
            dtos::user::SetAvatarRequest,
            models::TokenPair,
            models::UserResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Signup, login and session rotation"),
        (name = "Mailing", description = "Email confirmation and password recovery"),
        (name = "User", description = "Authenticated user profile"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: CredentialConfig,
    pub users: Arc<dyn UserStore>,
    pub ephemeral: Arc<dyn EphemeralStore>,
    pub credentials: CredentialService,
    pub guard: AuthenticationGuard,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Wire the core onto already-connected adapters.
    pub fn new(
        config: CredentialConfig,
        users: Arc<dyn UserStore>,
        ephemeral: Arc<dyn EphemeralStore>,
        email: Arc<dyn EmailProvider>,
    ) -> Self {
        let deadline = config.session.store_timeout();
        let codec = TokenCodec::new(&config.jwt)
            .with_password_reset_ttl(config.session.password_reset_ttl_seconds);
        let cache = UserCache::new(
            ephemeral.clone(),
            config.session.user_cache_ttl_seconds,
            deadline,
        );

        let credentials = CredentialService::new(
            users.clone(),
            ephemeral.clone(),
            email,
            codec.clone(),
            config.session.clone(),
            config.smtp.public_base_url.clone(),
        );
        let guard = AuthenticationGuard::new(codec, users.clone(), cache, deadline);
        let rate_limiter = RateLimiter::new(ephemeral.clone(), deadline);

        Self {
            config,
            users,
            ephemeral,
            credentials,
            guard,
            rate_limiter,
        }
    }
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let limits = &state.config.rate_limit;
    let auth_policy = RatePolicy::new(
        state.rate_limiter.clone(),
        limits.auth_limit,
        limits.auth_window_seconds,
        state.config.security.trust_forwarded_for,
    );
    let default_policy = RatePolicy::new(
        state.rate_limiter.clone(),
        limits.default_limit,
        limits.default_window_seconds,
        state.config.security.trust_forwarded_for,
    );

    // Credential endpoints, throttled with the auth window
    let public_routes = Router::new()
        .route("/api/auth/signup", post(handlers::auth::signup))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/refresh_token", get(handlers::auth::refresh_token))
        .route(
            "/api/mailing/confirm_email/:token",
            get(handlers::mailing::confirm_email),
        )
        .route(
            "/api/mailing/send_confirm_email",
            post(handlers::mailing::send_confirm_email),
        )
        .route(
            "/api/mailing/send_reset_password_email",
            post(handlers::mailing::send_reset_password_email),
        )
        .route(
            "/api/mailing/reset_password/:token",
            patch(handlers::mailing::reset_password),
        )
        .layer(from_fn_with_state(auth_policy.clone(), rate_limit_middleware));

    let logout_route = Router::new()
        .route("/api/auth/logout", post(handlers::auth::logout))
        .layer(from_fn_with_state(state.clone(), auth_middleware))
        .layer(from_fn_with_state(auth_policy, rate_limit_middleware));

    let user_routes = Router::new()
        .route("/api/user/me", get(handlers::user::get_me))
        .route("/api/user/set_password", patch(handlers::user::set_password))
        .route("/api/user/set_avatar", patch(handlers::user::set_avatar))
        .layer(from_fn_with_state(state.clone(), auth_middleware))
        .layer(from_fn_with_state(default_policy, rate_limit_middleware));

    let allowed_origins: Vec<HeaderValue> = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .merge(public_routes)
        .merge(logout_route)
        .merge(user_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::OPTIONS,
                ])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        );

    Ok(app)
}

/// Serve `app` until `shutdown` resolves. The listener closes at once; open
/// requests then get up to `grace` to complete.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    grace: Duration,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AppError> {
    let signalled = Arc::new(Notify::new());
    let trigger = signalled.clone();

    let server = service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        trigger.notify_one();
    })
    .into_future();

    tokio::select! {
        result = server => result?,
        _ = async {
            signalled.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(
                grace_seconds = grace.as_secs(),
                "Shutdown grace elapsed, dropping open connections"
            );
        }
    }

    Ok(())
}

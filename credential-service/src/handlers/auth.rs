use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::{
        auth::{LoginRequest, SignupRequest, SignupResponse},
        MessageResponse,
    },
    middleware::{BearerToken, CurrentUser},
    models::TokenPair,
    utils::ValidatedJson,
    AppState,
};

/// Create an account and send the confirmation email
#[utoipa::path(
    post,
    path = "/api/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = SignupResponse),
        (status = 409, description = "Account already exists", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn signup(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .credentials
        .signup(&req.email, &req.username, &req.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            user: user.sanitized(),
            detail: "User successfully created. Check your email for confirmation.".to_string(),
        }),
    ))
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenPair),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Email not confirmed", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<TokenPair>, AppError> {
    let pair = state.credentials.login(&req.email, &req.password).await?;
    Ok(Json(pair))
}

/// Rotate the session; the refresh token is sent as the bearer credential
#[utoipa::path(
    get,
    path = "/api/auth/refresh_token",
    responses(
        (status = 200, description = "New token pair", body = TokenPair),
        (status = 401, description = "Invalid, expired or reused refresh token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<Json<TokenPair>, AppError> {
    let pair = state.credentials.refresh(&token).await?;
    Ok(Json(pair))
}

/// End the current session
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<MessageResponse>, AppError> {
    state.credentials.logout(&user).await?;
    Ok(Json(MessageResponse::new("Logged out successfully")))
}

use service_core::{
    axum::{
        extract::{Path, State},
        Json,
    },
    error::AppError,
};

use crate::{
    dtos::{
        auth::{EmailRequest, ResetPasswordRequest},
        MessageResponse,
    },
    services::{ConfirmationOutcome, ResendOutcome},
    utils::ValidatedJson,
    AppState,
};

/// Confirm an email address with the token from the confirmation link
#[utoipa::path(
    get,
    path = "/api/mailing/confirm_email/{token}",
    params(("token" = String, Path, description = "Email verification token")),
    responses(
        (status = 200, description = "Email confirmed, or already confirmed", body = MessageResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Mailing"
)]
pub async fn confirm_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let message = match state.credentials.confirm_email(&token).await? {
        ConfirmationOutcome::Confirmed => "Email confirmed",
        ConfirmationOutcome::AlreadyConfirmed => "Your email is already confirmed",
    };
    Ok(Json(MessageResponse::new(message)))
}

/// Send another confirmation email
#[utoipa::path(
    post,
    path = "/api/mailing/send_confirm_email",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Request accepted", body = MessageResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Mailing"
)]
pub async fn send_confirm_email(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<EmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let message = match state.credentials.resend_confirmation(&req.email).await? {
        ResendOutcome::Dispatched => "Check your email for confirmation.",
        ResendOutcome::AlreadyConfirmed => "Your email is already confirmed",
    };
    Ok(Json(MessageResponse::new(message)))
}

/// Request a password reset link
#[utoipa::path(
    post,
    path = "/api/mailing/send_reset_password_email",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Request accepted", body = MessageResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Mailing"
)]
pub async fn send_reset_password_email(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<EmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state.credentials.request_password_reset(&req.email).await?;
    Ok(Json(MessageResponse::new(
        "Check your email for password reset.",
    )))
}

/// Set a new password with a reset token
#[utoipa::path(
    patch,
    path = "/api/mailing/reset_password/{token}",
    params(("token" = String, Path, description = "Password reset token")),
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "Passwords differ, or the token is invalid or expired", body = ErrorResponse)
    ),
    tag = "Mailing"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .credentials
        .reset_password(&token, &req.new_password, &req.confirm_password)
        .await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}

use service_core::{
    axum::{extract::State, Json},
    error::AppError,
};

use crate::{
    dtos::{
        user::{SetAvatarRequest, SetPasswordRequest},
        MessageResponse,
    },
    middleware::CurrentUser,
    models::UserResponse,
    utils::ValidatedJson,
    AppState,
};

/// Current user's profile
#[utoipa::path(
    get,
    path = "/api/user/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "User",
    security(("bearer_auth" = []))
)]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(user.sanitized())
}

/// Change password
#[utoipa::path(
    patch,
    path = "/api/user/set_password",
    request_body = SetPasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Passwords differ or current password is wrong", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "User",
    security(("bearer_auth" = []))
)]
pub async fn set_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidatedJson(req): ValidatedJson<SetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .credentials
        .set_password(
            &user,
            &req.current_password,
            &req.new_password,
            &req.confirm_password,
        )
        .await?;
    Ok(Json(MessageResponse::new("Password changed")))
}

/// Update avatar reference
#[utoipa::path(
    patch,
    path = "/api/user/set_avatar",
    request_body = SetAvatarRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "User",
    security(("bearer_auth" = []))
)]
pub async fn set_avatar(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidatedJson(req): ValidatedJson<SetAvatarRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let updated = state
        .credentials
        .update_avatar(&user, &req.avatar_url)
        .await?;
    Ok(Json(updated.sanitized()))
}

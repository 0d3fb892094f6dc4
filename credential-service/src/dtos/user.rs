use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SetPasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(min_length = 8)]
    pub new_password: String,

    pub confirm_password: String,
}

/// Avatar reference produced by the external media store.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SetAvatarRequest {
    #[validate(url(message = "Avatar must be a valid URL"))]
    #[schema(example = "https://cdn.example.com/avatars/alice.png")]
    pub avatar_url: String,
}

pub mod auth;
pub mod rate_limit;

pub use auth::{auth_middleware, BearerToken, CurrentUser};
pub use rate_limit::{rate_limit_middleware, RatePolicy};

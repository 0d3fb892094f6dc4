//! Domain models for the credential service.

mod token;
mod user;

pub use token::{TokenClaims, TokenPair, TokenPurpose};
pub use user::{gravatar_url, User, UserResponse};

//! HTTP handlers. Each maps a request onto one credential operation.

pub mod auth;
pub mod health;
pub mod mailing;
pub mod user;

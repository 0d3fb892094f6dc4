//! service-core: Shared infrastructure for the contact-manager services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;

pub use axum;

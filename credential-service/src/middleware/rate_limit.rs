use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use std::net::SocketAddr;

use crate::services::RateLimiter;

/// A limiter bound to one limit and window.
#[derive(Clone)]
pub struct RatePolicy {
    pub limiter: RateLimiter,
    pub limit: u64,
    pub window_seconds: u64,
    pub trust_forwarded_for: bool,
}

impl RatePolicy {
    pub fn new(
        limiter: RateLimiter,
        limit: u64,
        window_seconds: u64,
        trust_forwarded_for: bool,
    ) -> Self {
        Self {
            limiter,
            limit,
            window_seconds,
            trust_forwarded_for,
        }
    }
}

/// Client identity: the peer address, or the first `x-forwarded-for` hop when
/// a fronting proxy is trusted to set it.
fn client_identity(request: &Request, trust_forwarded_for: bool) -> String {
    let forwarded = trust_forwarded_for
        .then(|| {
            request
                .headers()
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
        })
        .flatten();

    forwarded
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Fixed-window throttling per client and route.
pub async fn rate_limit_middleware(
    State(policy): State<RatePolicy>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = client_identity(&request, policy.trust_forwarded_for);
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    policy
        .limiter
        .check(&identity, &route, policy.limit, policy.window_seconds)
        .await?;

    Ok(next.run(request).await)
}

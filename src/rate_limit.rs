/// HTTP request rate limiting
///
/// Request-level throttle over the whole API surface; the publishing quota
/// budget is the RateGovernor's job, not this middleware's.
use crate::config::RateLimitConfig;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc};

/// Request throttle shared across handlers
#[derive(Clone)]
pub struct HttpRateLimiter {
    enabled: bool,
    limiter: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl HttpRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::new(100).unwrap()),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::new(50).unwrap()));

        Self {
            enabled: config.enabled,
            limiter: Arc::new(GovernorLimiter::direct(quota)),
        }
    }

    pub fn check(&self) -> bool {
        !self.enabled || self.limiter.check().is_ok()
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<crate::context::AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !ctx.http_limiter.check() {
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_throttle() {
        let limiter = HttpRateLimiter::new(&RateLimitConfig {
            enabled: true,
            requests_per_second: 10,
            burst_size: 5,
        });

        for _ in 0..5 {
            assert!(limiter.check());
        }
        assert!(!limiter.check());
    }

    #[test]
    fn disabled_limiter_always_passes() {
        let limiter = HttpRateLimiter::new(&RateLimitConfig {
            enabled: false,
            requests_per_second: 1,
            burst_size: 1,
        });
        for _ in 0..20 {
            assert!(limiter.check());
        }
    }
}

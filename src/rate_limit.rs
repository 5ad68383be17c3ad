/// Rate Limiting System
///
/// Separate limiters per traffic class: signal/graph ingestion from
/// detection pipelines, score and alert reads from marketplace
/// services, and operator actions (enforcement, appeals, batch runs).
use crate::config::RateLimitConfig;
use crate::error::{EngineError, EngineResult};
use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc};

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    ingest: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    read: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    ops: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let ingest_quota = Quota::per_second(
            NonZeroU32::new(config.ingest_rps).unwrap_or(NonZeroU32::new(200).unwrap()),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::new(50).unwrap()));

        let read_quota = Quota::per_second(
            NonZeroU32::new(config.read_rps).unwrap_or(NonZeroU32::new(100).unwrap()),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::new(50).unwrap()));

        let ops_quota = Quota::per_second(
            NonZeroU32::new(config.ops_rps).unwrap_or(NonZeroU32::new(20).unwrap()),
        )
        .allow_burst(
            NonZeroU32::new(config.burst_size / 5).unwrap_or(NonZeroU32::new(10).unwrap()),
        );

        Self {
            ingest: Arc::new(GovernorLimiter::direct(ingest_quota)),
            read: Arc::new(GovernorLimiter::direct(read_quota)),
            ops: Arc::new(GovernorLimiter::direct(ops_quota)),
        }
    }

    /// Check rate limit for signal and graph ingestion
    pub fn check_ingest(&self) -> EngineResult<()> {
        match self.ingest.check() {
            Ok(_) => Ok(()),
            Err(_) => Err(EngineError::RateLimitExceeded {
                retry_after: std::time::Duration::from_secs(1),
            }),
        }
    }

    /// Check rate limit for read traffic
    pub fn check_read(&self) -> EngineResult<()> {
        match self.read.check() {
            Ok(_) => Ok(()),
            Err(_) => Err(EngineError::RateLimitExceeded {
                retry_after: std::time::Duration::from_secs(1),
            }),
        }
    }

    /// Check rate limit for operator actions
    pub fn check_ops(&self) -> EngineResult<()> {
        match self.ops.check() {
            Ok(_) => Ok(()),
            Err(_) => Err(EngineError::RateLimitExceeded {
                retry_after: std::time::Duration::from_secs(1),
            }),
        }
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<crate::context::AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path();
    let is_ingest = request.method() != Method::GET
        && (path.starts_with("/api/signals") || path.starts_with("/api/relationships"));

    let rate_limit_result = if is_ingest {
        ctx.rate_limiter.check_ingest()
    } else if request.method() == Method::GET {
        ctx.rate_limiter.check_read()
    } else {
        ctx.rate_limiter.check_ops()
    };

    match rate_limit_result {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => Err(StatusCode::TOO_MANY_REQUESTS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            ingest_rps: 200,
            read_rps: 100,
            ops_rps: 20,
            burst_size: 50,
        }
    }

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new(&test_config());

        // Should allow first request in every class
        assert!(limiter.check_ingest().is_ok());
        assert!(limiter.check_read().is_ok());
        assert!(limiter.check_ops().is_ok());
    }

    #[test]
    fn test_burst_limit() {
        let config = RateLimitConfig {
            enabled: true,
            ingest_rps: 10,
            read_rps: 5,
            ops_rps: 2,
            burst_size: 5,
        };
        let limiter = RateLimiter::new(&config);

        // Should allow burst requests
        for _ in 0..5 {
            assert!(limiter.check_ingest().is_ok());
        }

        // Should hit rate limit after burst
        assert!(limiter.check_ingest().is_err());
    }
}

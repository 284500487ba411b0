/// Per-IP rate limiting for the public auth routes
use crate::{auth::ClientInfo, config::RateLimitConfig, context::AppContext, error::AppError};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

const AUTH_WINDOW: Duration = Duration::from_secs(15 * 60);
const LOGIN_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Which budget a route draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Signup and reset requests
    Auth,
    /// Login and OTP verification
    Login,
}

/// Keyed limiters, one bucket per client IP
#[derive(Clone)]
pub struct RouteLimiters {
    enabled: bool,
    auth: Arc<DefaultKeyedRateLimiter<String>>,
    login: Arc<DefaultKeyedRateLimiter<String>>,
}

/// `requests` per `window`, with the whole budget available as a burst
fn quota(requests: u32, window: Duration) -> Quota {
    let requests = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
    let period = window / requests.get();
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(requests))
        .allow_burst(requests)
}

impl RouteLimiters {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            auth: Arc::new(RateLimiter::keyed(quota(config.auth_requests_per_window, AUTH_WINDOW))),
            login: Arc::new(RateLimiter::keyed(quota(config.login_requests_per_window, LOGIN_WINDOW))),
        }
    }

    /// Take one request from the client's budget
    pub fn check(&self, class: RouteClass, ip: &str) -> Result<(), AppError> {
        if !self.enabled {
            return Ok(());
        }

        let limiter = match class {
            RouteClass::Auth => &self.auth,
            RouteClass::Login => &self.login,
        };

        limiter.check_key(&ip.to_string()).map_err(|_| {
            tracing::warn!(ip, ?class, "Rate limit exceeded");
            AppError::RateLimited("Too many requests. Please try again later.".to_string())
        })
    }

    /// Drop idle buckets
    pub fn retain_recent(&self) {
        self.auth.retain_recent();
        self.login.retain_recent();
    }
}

/// Rate limiting middleware for signup and reset routes
pub async fn limit_auth_routes(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    ctx.limiters.check(RouteClass::Auth, &client.ip)?;
    Ok(next.run(request).await)
}

/// Rate limiting middleware for login and OTP routes
pub async fn limit_login_routes(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    ctx.limiters.check(RouteClass::Login, &client.ip)?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool) -> RateLimitConfig {
        RateLimitConfig {
            enabled,
            auth_requests_per_window: 3,
            login_requests_per_window: 2,
        }
    }

    #[test]
    fn test_budget_per_ip() {
        let limiters = RouteLimiters::new(&config(true));

        for _ in 0..3 {
            limiters.check(RouteClass::Auth, "1.1.1.1").unwrap();
        }
        assert!(matches!(
            limiters.check(RouteClass::Auth, "1.1.1.1"),
            Err(AppError::RateLimited(_))
        ));

        limiters.check(RouteClass::Auth, "2.2.2.2").unwrap();
        limiters.check(RouteClass::Login, "1.1.1.1").unwrap();
    }

    #[test]
    fn test_disabled_never_limits() {
        let limiters = RouteLimiters::new(&config(false));
        for _ in 0..20 {
            limiters.check(RouteClass::Login, "1.1.1.1").unwrap();
        }
    }
}

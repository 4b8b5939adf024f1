//! Per-client request throttling.
//!
//! Budgets are tracked per (IP, tier) pair in a lock-free map. Each bucket
//! holds a window's worth of tokens that refill continuously, so a client
//! that backs off regains capacity without waiting for a hard window reset.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::audit::extract_client_ip;
use crate::config::RateLimitConfig;
use crate::AppState;

/// Budget tier. Auth endpoints get a much smaller budget than the rest of
/// the API to slow down credential stuffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Api,
    Auth,
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    window_start: Instant,
    last_seen: Instant,
}

impl Bucket {
    fn full(limit: u32) -> Self {
        let now = Instant::now();
        Self {
            tokens: limit,
            window_start: now,
            last_seen: now,
        }
    }
}

/// What a client is still allowed to do in the current window. Surfaced to
/// callers through the X-RateLimit response headers.
#[derive(Debug, Clone, Copy)]
pub struct Allowance {
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
}

/// Shared throttle state, one bucket per (client IP, tier).
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<(IpAddr, Tier), Bucket>,
    config: RateLimitConfig,
    window: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            window: Duration::from_secs(config.window_seconds),
            config,
        }
    }

    fn limit_for(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Api => self.config.api_requests_per_window,
            Tier::Auth => self.config.auth_requests_per_window,
        }
    }

    /// Take one token from the client's bucket. Returns the remaining
    /// allowance, or the number of seconds to wait when the bucket is empty.
    pub fn try_acquire(&self, ip: IpAddr, tier: Tier) -> Result<Allowance, u64> {
        if !self.config.enabled {
            return Ok(Allowance {
                limit: u32::MAX,
                remaining: u32::MAX,
                reset_secs: 0,
            });
        }

        let limit = self.limit_for(tier);
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry((ip, tier))
            .or_insert_with(|| Bucket::full(limit));

        let elapsed = now.duration_since(bucket.window_start);
        if elapsed >= self.window {
            bucket.tokens = limit;
            bucket.window_start = now;
        } else {
            // Continuous refill proportional to idle time since the last request.
            let refill_per_sec = limit as f64 / self.window.as_secs_f64();
            let idle = now.duration_since(bucket.last_seen);
            let refilled = (idle.as_secs_f64() * refill_per_sec) as u32;
            bucket.tokens = (bucket.tokens + refilled).min(limit);
        }
        bucket.last_seen = now;

        let reset_secs = self.window.saturating_sub(elapsed).as_secs();
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            Ok(Allowance {
                limit,
                remaining: bucket.tokens,
                reset_secs,
            })
        } else {
            Err(reset_secs.max(1))
        }
    }

    /// Drop buckets that have sat idle for two full windows.
    pub fn prune(&self) {
        let now = Instant::now();
        let stale_after = self.window * 2;
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_seen) < stale_after);
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

fn client_ip(request: &Request<Body>) -> IpAddr {
    extract_client_ip(request.headers(), None)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Middleware for general API routes.
pub async fn rate_limit_api(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    enforce(state, request, next, Tier::Api).await
}

/// Middleware for login and registration routes.
pub async fn rate_limit_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    enforce(state, request, next, Tier::Auth).await
}

async fn enforce(
    state: Arc<AppState>,
    request: Request<Body>,
    next: Next,
    tier: Tier,
) -> Result<Response, Response> {
    let ip = client_ip(&request);

    match state.rate_limiter.try_acquire(ip, tier) {
        Ok(allowance) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(
                "X-RateLimit-Limit",
                allowance.limit.to_string().parse().unwrap(),
            );
            headers.insert(
                "X-RateLimit-Remaining",
                allowance.remaining.to_string().parse().unwrap(),
            );
            headers.insert(
                "X-RateLimit-Reset",
                allowance.reset_secs.to_string().parse().unwrap(),
            );
            Ok(response)
        }
        Err(retry_after) => {
            tracing::warn!(%ip, ?tier, retry_after, "Rate limit exceeded");
            let response = (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    ("Retry-After", retry_after.to_string()),
                    ("X-RateLimit-Limit", state.rate_limiter.limit_for(tier).to_string()),
                    ("X-RateLimit-Remaining", "0".to_string()),
                    ("X-RateLimit-Reset", retry_after.to_string()),
                ],
                format!("Rate limit exceeded. Retry in {} seconds.", retry_after),
            );
            Err(response.into_response())
        }
    }
}

/// Periodically prune idle buckets so the map does not grow without bound.
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            rate_limiter.prune();
            tracing::debug!(
                buckets = rate_limiter.bucket_count(),
                "Pruned idle rate limit buckets"
            );
        }
    });
}

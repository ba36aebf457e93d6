//! Per-client request limiting for the JSON API.
//!
//! Fixed window per client IP: `requests_per_window` requests, then 429
//! until the window rolls over.

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::AppError;
use crate::config::RateLimitConfig;
use crate::AppState;

pub const LIMIT_MESSAGE: &str = "Too many requests from this IP, please try again in an hour!";

/// Entry in the rate limit tracker
#[derive(Debug, Clone)]
struct RateLimitEntry {
    /// Requests left in the current window
    remaining: u32,
    window_start: Instant,
}

/// Thread-safe rate limiter using dashmap
#[derive(Debug)]
pub struct RateLimiter {
    entries: DashMap<IpAddr, RateLimitEntry>,
    config: RateLimitConfig,
    window_duration: Duration,
}

/// Information about rate limit status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Maximum requests per window
    pub limit: u32,
    /// Seconds until the window resets
    pub reset_after: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            window_duration: Duration::from_secs(config.window_seconds),
            config,
        }
    }

    /// Count a request from `ip`.
    /// Returns the status if allowed, or the seconds to wait if limited.
    pub fn check(&self, ip: IpAddr) -> Result<RateLimitInfo, u64> {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> Result<RateLimitInfo, u64> {
        let limit = self.config.requests_per_window;
        if !self.config.enabled {
            return Ok(RateLimitInfo {
                remaining: limit,
                limit,
                reset_after: 0,
            });
        }

        let mut entry = self.entries.entry(ip).or_insert_with(|| RateLimitEntry {
            remaining: limit,
            window_start: now,
        });

        let mut elapsed = now.saturating_duration_since(entry.window_start);
        if elapsed >= self.window_duration {
            entry.remaining = limit;
            entry.window_start = now;
            elapsed = Duration::ZERO;
        }

        let reset_after = self.window_duration.saturating_sub(elapsed).as_secs();
        if entry.remaining == 0 {
            return Err(reset_after.max(1));
        }
        entry.remaining -= 1;
        Ok(RateLimitInfo {
            remaining: entry.remaining,
            limit,
            reset_after,
        })
    }

    /// Drop entries whose window ended long ago
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let expiry = self.window_duration * 2;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.window_start) < expiry);
    }

    /// Get the number of tracked entries (for monitoring)
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Client IP: the socket peer, unless the app sits behind a trusted proxy,
/// in which case the first `X-Forwarded-For` hop, then `X-Real-IP`.
fn client_ip(request: &axum::extract::Request, trust_proxy: bool) -> IpAddr {
    let headers = request.headers();
    let forwarded = || {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
    };
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
    };
    let peer = || {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    };

    let proxied = if trust_proxy {
        forwarded().or_else(real_ip)
    } else {
        None
    };
    proxied
        .or_else(peer)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn header(value: impl ToString) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

/// Rate limiting middleware for `/api`
pub async fn rate_limit_api(
    State(state): State<Arc<AppState>>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request, state.config.server.trust_proxy);

    match state.rate_limiter.check(ip) {
        Ok(info) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", header(info.limit));
            headers.insert("X-RateLimit-Remaining", header(info.remaining));
            headers.insert("X-RateLimit-Reset", header(info.reset_after));
            response
        }
        Err(retry_after) => {
            tracing::debug!(%ip, retry_after, "Rate limit exceeded");
            let mut response = AppError::too_many_requests(LIMIT_MESSAGE).into_response();
            let headers = response.headers_mut();
            headers.insert("Retry-After", header(retry_after));
            headers.insert("X-RateLimit-Limit", header(state.rate_limiter.config.requests_per_window));
            headers.insert("X-RateLimit-Remaining", header(0));
            headers.insert("X-RateLimit-Reset", header(retry_after));
            response
        }
    }
}

/// Spawn a background task to periodically clean up expired rate limit entries
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            rate_limiter.cleanup_expired();
            tracing::debug!(
                "Rate limiter cleanup complete, {} entries remaining",
                rate_limiter.entry_count()
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests_per_window: 10,
            window_seconds: 60,
            cleanup_interval_seconds: 300,
        }
    }

    #[test]
    fn test_allows_requests_under_limit() {
        let limiter = RateLimiter::new(test_config());
        let ip: IpAddr = "192.168.1.1".parse().unwrap();

        for i in 0..10 {
            let info = limiter.check(ip).unwrap_or_else(|_| panic!("request {} should pass", i));
            assert_eq!(info.remaining, 9 - i);
        }
        assert!(limiter.check(ip).is_err(), "Request should be rate limited");
    }

    #[test]
    fn test_different_ips_have_separate_limits() {
        let limiter = RateLimiter::new(test_config());
        let ip1: IpAddr = "192.168.1.1".parse().unwrap();
        let ip2: IpAddr = "192.168.1.2".parse().unwrap();

        for _ in 0..10 {
            let _ = limiter.check(ip1);
        }
        assert!(limiter.check(ip1).is_err());
        assert!(limiter.check(ip2).is_ok(), "Different IP should have its own limit");
    }

    #[test]
    fn test_window_rolls_over() {
        let limiter = RateLimiter::new(test_config());
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let start = Instant::now();

        for _ in 0..10 {
            limiter.check_at(ip, start).unwrap();
        }
        let retry = limiter.check_at(ip, start + Duration::from_secs(15)).unwrap_err();
        assert_eq!(retry, 45);

        let info = limiter.check_at(ip, start + Duration::from_secs(61)).unwrap();
        assert_eq!(info.remaining, 9);
    }

    #[test]
    fn test_disabled_rate_limiting() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..test_config()
        });
        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        for _ in 0..100 {
            assert!(limiter.check(ip).is_ok());
        }
        assert_eq!(limiter.entry_count(), 0);
    }

    fn request_from(peer: &str, forwarded: &str) -> axum::extract::Request {
        let mut request = axum::extract::Request::builder()
            .header("x-forwarded-for", forwarded)
            .body(axum::body::Body::empty())
            .unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[test]
    fn test_forwarded_header_ignored_without_trusted_proxy() {
        let request = request_from("203.0.113.7:52000", "198.51.100.1, 10.0.0.1");
        assert_eq!(client_ip(&request, false), "203.0.113.7".parse::<IpAddr>().unwrap());
        assert_eq!(client_ip(&request, true), "198.51.100.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_rotating_forwarded_header_shares_one_budget() {
        let limiter = RateLimiter::new(test_config());
        for i in 0..10 {
            let request = request_from("203.0.113.7:52000", &format!("198.51.100.{}", i));
            assert!(limiter.check(client_ip(&request, false)).is_ok());
        }
        let request = request_from("203.0.113.7:52000", "198.51.100.99");
        assert!(limiter.check(client_ip(&request, false)).is_err());
    }

    #[test]
    fn test_cleanup_keeps_recent_entries() {
        let limiter = RateLimiter::new(test_config());
        let _ = limiter.check("192.168.1.1".parse().unwrap());
        limiter.cleanup_expired();
        assert_eq!(limiter.entry_count(), 1);
    }
}

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use super::ErrorResponse;
use crate::api::AppState;

/// In-process sliding-window rate limiter.
///
/// Keeps, per key, the instants of recent allowed requests. A request is
/// allowed iff fewer than `max_requests` entries remain within the trailing
/// window after pruning; denied requests are not recorded. All access goes
/// through one coarse lock — request volumes here are nowhere near a hot
/// path.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check and record a request for `key`. Returns true if allowed.
    pub fn check(&self, key: &str, max_requests: u32, window_seconds: u64) -> bool {
        self.check_at(key, max_requests, window_seconds, Instant::now())
    }

    fn check_at(&self, key: &str, max_requests: u32, window_seconds: u64, now: Instant) -> bool {
        let window = Duration::from_secs(window_seconds);
        let mut windows = self.windows.lock().unwrap();
        let entries = windows.entry(key.to_string()).or_default();

        // Prune-then-check-then-record is atomic under the lock.
        while let Some(oldest) = entries.front() {
            if now.duration_since(*oldest) >= window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if (entries.len() as u32) < max_requests {
            entries.push_back(now);
            true
        } else {
            false
        }
    }

    /// Drop keys with no entry newer than `max_age`, to bound memory.
    /// Safe to call concurrently with `check`.
    pub fn cleanup(&self, max_age: Duration) {
        self.cleanup_at(max_age, Instant::now());
    }

    fn cleanup_at(&self, max_age: Duration, now: Instant) {
        let mut windows = self.windows.lock().unwrap();
        windows.retain(|_, entries| {
            entries
                .back()
                .is_some_and(|newest| now.duration_since(*newest) < max_age)
        });
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.windows.lock().unwrap().len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a rate-limit key from the principal id or the client IP.
/// Keying is an explicit per-call-site choice, not a convention.
pub fn rate_limit_key(principal: Option<Uuid>, ip: Option<&str>) -> String {
    if let Some(id) = principal {
        format!("user:{}", id)
    } else if let Some(ip) = ip {
        format!("ip:{}", ip)
    } else {
        "unknown".to_string()
    }
}

/// Resolve the client IP, preferring the first X-Forwarded-For hop.
pub fn client_ip(headers: &axum::http::HeaderMap, addr: &SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string())
}

/// Global per-IP rate limit, applied to every route before auth.
/// Limits come from `Config`; a deny is a uniform 429 with no Retry-After.
pub async fn global_rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(req.headers(), &addr);
    let key = rate_limit_key(None, Some(&ip));

    let allowed = state.rate_limiter.check(
        &key,
        state.config.rate_limit_max_requests,
        state.config.rate_limit_window_seconds,
    );

    if !allowed {
        tracing::warn!(key = %key, "Rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse::new(
                "Too many requests. Please slow down.",
                "RATE_LIMITED",
            )),
        )
            .into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_denies() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        let results: Vec<bool> = (0..4).map(|_| limiter.check_at("k", 3, 60, now)).collect();
        assert_eq!(results, vec![true, true, true, false]);
    }

    #[test]
    fn denied_requests_are_not_recorded() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        for _ in 0..10 {
            limiter.check_at("k", 2, 60, now);
        }
        // Only the two allowed entries occupy the window; once it slides,
        // capacity is exactly restored.
        let later = now + Duration::from_secs(61);
        assert!(limiter.check_at("k", 2, 60, later));
        assert!(limiter.check_at("k", 2, 60, later));
        assert!(!limiter.check_at("k", 2, 60, later));
    }

    #[test]
    fn window_slides_and_capacity_recovers() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        assert!(limiter.check_at("k", 1, 60, now));
        assert!(!limiter.check_at("k", 1, 60, now + Duration::from_secs(30)));
        assert!(limiter.check_at("k", 1, 60, now + Duration::from_secs(61)));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        assert!(limiter.check_at("a", 1, 60, now));
        assert!(!limiter.check_at("a", 1, 60, now));
        assert!(limiter.check_at("b", 1, 60, now));
    }

    #[test]
    fn cleanup_drops_only_stale_keys() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        limiter.check_at("stale", 10, 3600, now);
        limiter.check_at("fresh", 10, 3600, now + Duration::from_secs(500));
        assert_eq!(limiter.tracked_keys(), 2);

        limiter.cleanup_at(Duration::from_secs(300), now + Duration::from_secs(600));
        assert_eq!(limiter.tracked_keys(), 1);

        // The surviving key keeps its history.
        let later = now + Duration::from_secs(600);
        for _ in 0..9 {
            assert!(limiter.check_at("fresh", 10, 3600, later));
        }
        assert!(!limiter.check_at("fresh", 10, 3600, later));
    }

    #[test]
    fn key_builder_prefers_principal() {
        let id = Uuid::new_v4();
        assert_eq!(
            rate_limit_key(Some(id), Some("1.2.3.4")),
            format!("user:{}", id)
        );
        assert_eq!(rate_limit_key(None, Some("1.2.3.4")), "ip:1.2.3.4");
        assert_eq!(rate_limit_key(None, None), "unknown");
    }
}

//! Advisory per-address request limiter (fixed window, process-local).
//!
//! Counts live in memory only: they reset on restart and are not shared between instances. A
//! background task drops windows that have already expired.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::AppState;
use crate::error::AppError;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after_secs: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    max: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self { max, window, windows: Mutex::new(HashMap::new()) }
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Utc::now())
    }

    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> Decision {
        let span = chrono::Duration::from_std(self.window).unwrap_or_else(|_| chrono::Duration::minutes(15));
        let mut map = self.windows.lock();
        let w = map.entry(key.to_string()).or_insert(Window { count: 0, reset_at: now + span });
        if now > w.reset_at {
            *w = Window { count: 0, reset_at: now + span };
        }
        w.count = w.count.saturating_add(1);
        let millis_left = (w.reset_at - now).num_milliseconds().max(0) as u64;
        Decision {
            allowed: w.count <= self.max,
            limit: self.max,
            remaining: self.max.saturating_sub(w.count),
            reset_at: w.reset_at,
            retry_after_secs: millis_left.div_ceil(1000),
        }
    }

    /// Drop expired windows; returns how many were removed.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut map = self.windows.lock();
        let before = map.len();
        map.retain(|_, w| now <= w.reset_at);
        before - map.len()
    }

    pub fn tracked(&self) -> usize {
        self.windows.lock().len()
    }
}

/// Periodic cleanup of expired windows for the lifetime of the process.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;
            let removed = limiter.sweep_at(Utc::now());
            if removed > 0 {
                debug!(removed = removed, "rate_limit_sweep");
            }
        }
    })
}

fn apply_headers(headers: &mut HeaderMap, d: &Decision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(d.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(d.remaining));
    if let Ok(v) = HeaderValue::from_str(&d.reset_at.to_rfc3339_opts(SecondsFormat::Millis, true)) {
        headers.insert("x-ratelimit-reset", v);
    }
}

fn client_key(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware: count the request against the caller's address and reject with 429 past the limit.
pub async fn enforce(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(limiter) = state.rate_limiter.as_ref() else {
        return next.run(req).await;
    };
    let key = client_key(&req);
    let decision = limiter.check(&key);
    let mut resp = if decision.allowed {
        next.run(req).await
    } else {
        warn!(client = %key, limit = decision.limit, "rate limit exceeded");
        AppError::rate_limited(decision.retry_after_secs).into_response()
    };
    apply_headers(resp.headers_mut(), &decision);
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn counts_until_limit_then_rejects() {
        let rl = RateLimiter::new(3, Duration::from_secs(900));
        let now = t0();
        let d1 = rl.check_at("1.2.3.4", now);
        assert!(d1.allowed);
        assert_eq!(d1.remaining, 2);
        rl.check_at("1.2.3.4", now);
        let d3 = rl.check_at("1.2.3.4", now);
        assert!(d3.allowed);
        assert_eq!(d3.remaining, 0);
        let d4 = rl.check_at("1.2.3.4", now + chrono::Duration::seconds(60));
        assert!(!d4.allowed);
        assert_eq!(d4.retry_after_secs, 840);
        // Other addresses have their own window.
        assert!(rl.check_at("5.6.7.8", now).allowed);
    }

    #[test]
    fn window_resets_after_expiry() {
        let rl = RateLimiter::new(1, Duration::from_secs(60));
        let now = t0();
        assert!(rl.check_at("a", now).allowed);
        assert!(!rl.check_at("a", now + chrono::Duration::seconds(30)).allowed);
        let later = rl.check_at("a", now + chrono::Duration::seconds(61));
        assert!(later.allowed);
        assert_eq!(later.reset_at, now + chrono::Duration::seconds(121));
    }

    #[test]
    fn sweep_drops_only_expired_windows() {
        let rl = RateLimiter::new(10, Duration::from_secs(60));
        let now = t0();
        rl.check_at("old", now);
        rl.check_at("new", now + chrono::Duration::seconds(50));
        assert_eq!(rl.sweep_at(now + chrono::Duration::seconds(70)), 1);
        assert_eq!(rl.tracked(), 1);
    }

    #[test]
    fn headers_carry_limit_state() {
        let rl = RateLimiter::new(5, Duration::from_secs(900));
        let d = rl.check_at("k", t0());
        let mut h = HeaderMap::new();
        apply_headers(&mut h, &d);
        assert_eq!(h["x-ratelimit-limit"], "5");
        assert_eq!(h["x-ratelimit-remaining"], "4");
        assert_eq!(h["x-ratelimit-reset"], "2024-05-01T12:15:00.000Z");
    }
}

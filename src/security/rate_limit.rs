//! Per-route rate limiting with a fixed-window counter store.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::RateLimitPolicy;
use crate::observability::metrics;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Sweep expired windows once the map grows past this many keys, at most
/// once per period.
const SWEEP_THRESHOLD: usize = 10_000;

/// Counter state for one client key after a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u64,
    pub remaining: u64,
    /// Unix timestamp (seconds) at which the window resets.
    pub reset: u64,
    pub reached: bool,
}

/// Concurrent per-key counter. Implementations synchronize internally.
pub trait CounterStore: Send + Sync {
    /// Counts one hit for `key`.
    fn increment(&self, key: &str) -> Quota;

    fn allow(&self, key: &str) -> bool {
        !self.increment(key).reached
    }
}

struct Window {
    count: u64,
    started: Instant,
}

/// `limit` hits per `period`, counted from each key's first hit.
pub struct FixedWindowStore {
    limit: u64,
    period: Duration,
    windows: DashMap<String, Window>,
    sweep_threshold: usize,
    origin: Instant,
    /// Milliseconds after `origin` of the last sweep.
    last_sweep: AtomicU64,
}

impl FixedWindowStore {
    pub fn new(limit: u64, period: Duration) -> Self {
        Self {
            limit,
            period,
            windows: DashMap::new(),
            sweep_threshold: SWEEP_THRESHOLD,
            origin: Instant::now(),
            last_sweep: AtomicU64::new(0),
        }
    }

    /// Number of client keys currently held.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drops expired windows when the map is large and a period has passed
    /// since the previous sweep. Only one caller wins the sweep.
    fn maybe_sweep(&self, now: Instant) {
        if self.windows.len() <= self.sweep_threshold {
            return;
        }

        let now_ms = millis(now.duration_since(self.origin));
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < millis(self.period) {
            return;
        }
        if self
            .last_sweep
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let period = self.period;
        self.windows
            .retain(|_, window| now.duration_since(window.started) < period);
        tracing::debug!(remaining = self.windows.len(), "Expired rate-limit windows swept");
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl CounterStore for FixedWindowStore {
    fn increment(&self, key: &str) -> Quota {
        let now = Instant::now();
        self.maybe_sweep(now);

        let (count, started) = {
            let mut window = self.windows.entry(key.to_string()).or_insert(Window {
                count: 0,
                started: now,
            });
            if now.duration_since(window.started) >= self.period {
                window.count = 0;
                window.started = now;
            }
            window.count += 1;
            (window.count, window.started)
        };

        let resets_in = self.period.saturating_sub(now.duration_since(started));
        let reset = SystemTime::now()
            .checked_add(resets_in)
            .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());

        Quota {
            limit: self.limit,
            remaining: self.limit.saturating_sub(count),
            reset,
            reached: count > self.limit,
        }
    }
}

/// Rate-limit stage state for one route.
#[derive(Clone)]
pub struct RateLimiter {
    route: Arc<str>,
    store: Arc<dyn CounterStore>,
    trust_forwarded_header: bool,
}

impl RateLimiter {
    pub fn new(route: &str, store: Arc<dyn CounterStore>, trust_forwarded_header: bool) -> Self {
        Self {
            route: Arc::from(route),
            store,
            trust_forwarded_header,
        }
    }

    /// In-memory limiter for a configured policy.
    pub fn from_policy(route: &str, policy: &RateLimitPolicy) -> Self {
        Self::new(
            route,
            Arc::new(FixedWindowStore::new(policy.limit, policy.period)),
            policy.trust_forwarded_header,
        )
    }

    /// Key a request is counted under.
    pub fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.trust_forwarded_header {
            let forwarded = header_str(headers, "x-forwarded-for")
                .and_then(|list| list.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .or_else(|| header_str(headers, "x-real-ip").map(str::trim).filter(|ip| !ip.is_empty()));
            if let Some(ip) = forwarded {
                return ip.to_string();
            }
        }

        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn set_quota_headers(headers: &mut HeaderMap, quota: &Quota) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(quota.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(quota.reset));
}

pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = limiter.client_key(request.headers(), peer);
    let quota = limiter.store.increment(&key);

    let mut response = if quota.reached {
        tracing::warn!(route = %limiter.route, client = %key, "Rate limit exceeded");
        metrics::record_rate_limited(&limiter.route);
        let mut response = Response::new(Body::from("Limit exceeded"));
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        response
    } else {
        next.run(request).await
    };

    set_quota_headers(response.headers_mut(), &quota);
    response
}

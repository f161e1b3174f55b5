//! Request and connect throttling.
//!
//! Two independent limiters live here:
//!
//! - [`RateLimiter`] is a keyed token bucket. The packet protocol keys it by
//!   user id for mutating requests; the HTTP API keys it by client IP.
//! - [`ConnectLimiter`] classifies new TCP connects per source IP over a
//!   one-second sliding window and enforces a cool-down on abusive IPs.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;

const CONNECT_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token bucket per key, refilled at `rate` tokens per second up to
/// `capacity`.
#[derive(Clone)]
pub struct RateLimiter<K = IpAddr> {
    buckets: Arc<Mutex<HashMap<K, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl<K: Hash + Eq + Clone> RateLimiter<K> {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    pub async fn check(&self, key: &K) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key.clone())
            .or_insert_with(|| TokenBucket::new(self.capacity));
        bucket.try_consume(self.rate, self.capacity)
    }

    pub async fn purge_stale(&self, max_idle_secs: f64) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_refill).as_secs_f64() < max_idle_secs
        });
    }

    pub async fn tracked(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

impl Default for RateLimiter<IpAddr> {
    fn default() -> Self {
        Self::new(10.0, 30.0)
    }
}

pub async fn rate_limit_middleware(
    axum::extract::State(limiter): axum::extract::State<RateLimiter<IpAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(ip) = extract_client_ip(&req) {
        if !limiter.check(&ip).await {
            warn!(ip = %ip, "HTTP rate limit exceeded");
            crate::metrics::counters::rate_limited_total("http");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}

// Only the socket peer counts: forwarding headers are client-controlled.
fn extract_client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip())
}

/// Verdict for one incoming connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectClass {
    Normal,
    /// Over the logging threshold; still admitted.
    Suspicious,
    /// Over the refusal threshold or inside a cool-down; drop the socket.
    Refused,
}

#[derive(Debug, Default)]
struct ConnectWindow {
    hits: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
}

impl ConnectWindow {
    fn expire(&mut self, now: Instant) {
        while let Some(&front) = self.hits.front() {
            if now.duration_since(front) >= CONNECT_WINDOW {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window connect classifier keyed by source IP.
pub struct ConnectLimiter {
    windows: DashMap<IpAddr, ConnectWindow>,
    suspicious: usize,
    malicious: usize,
    cooldown: Duration,
}

impl ConnectLimiter {
    pub fn new(suspicious: usize, malicious: usize, cooldown: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            suspicious: suspicious.max(1),
            malicious: malicious.max(1),
            cooldown,
        }
    }

    pub fn classify(&self, ip: IpAddr) -> ConnectClass {
        self.classify_at(ip, Instant::now())
    }

    /// Record a connect from `ip` at `now` and classify it.
    pub fn classify_at(&self, ip: IpAddr, now: Instant) -> ConnectClass {
        let mut window = self.windows.entry(ip).or_default();

        if let Some(until) = window.cooldown_until {
            if now < until {
                return ConnectClass::Refused;
            }
            window.cooldown_until = None;
        }

        window.expire(now);
        window.hits.push_back(now);
        // Bounded: a refusal starts a cool-down before the deque can grow
        // past the threshold.
        let count = window.hits.len();

        if count >= self.malicious {
            window.cooldown_until = Some(now + self.cooldown);
            window.hits.clear();
            warn!(
                %ip,
                count,
                cooldown_secs = self.cooldown.as_secs(),
                "Connect flood, cooling down"
            );
            return ConnectClass::Refused;
        }
        if count >= self.suspicious {
            warn!(%ip, count, "Suspicious connect rate");
            return ConnectClass::Suspicious;
        }
        ConnectClass::Normal
    }

    /// Drop windows with no recent hits and no active cool-down.
    pub fn purge_stale(&self) {
        let now = Instant::now();
        self.windows.retain(|_, window| {
            window.expire(now);
            !window.hits.is_empty() || window.cooldown_until.is_some_and(|until| now < until)
        });
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

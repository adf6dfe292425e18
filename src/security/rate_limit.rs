//! Per-IP rate limiting middleware.
//!
//! A sliding window of request timestamps per client IP. Idle clients are
//! swept periodically so the map cannot grow without bound.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::config::RateLimitConfig;

struct ClientBucket {
    requests: Vec<Instant>,
    last_seen: Instant,
}

/// Sliding-window rate limiter keyed by client IP.
pub struct RateLimiter {
    clients: Mutex<HashMap<IpAddr, ClientBucket>>,
    max_requests: usize,
    window: Duration,
    client_expiry: Duration,
}

impl RateLimiter {
    /// Create the limiter and start its cleanup task.
    pub fn new(config: &RateLimitConfig) -> Arc<Self> {
        let limiter = Arc::new(Self {
            clients: Mutex::new(HashMap::new()),
            max_requests: config.requests_per_second as usize,
            window: config.window(),
            client_expiry: config.client_expiry(),
        });

        let sweeper = Arc::clone(&limiter);
        let cleanup_interval = config.cleanup_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweeper.cleanup();
            }
        });

        limiter
    }

    /// Whether a request from `ip` is within budget. Records the request
    /// when allowed.
    pub fn allow(&self, ip: IpAddr) -> bool {
        let mut clients = self.clients.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();

        let bucket = clients.entry(ip).or_insert_with(|| ClientBucket {
            requests: Vec::new(),
            last_seen: now,
        });
        bucket.last_seen = now;

        let cutoff = now - self.window;
        bucket.requests.retain(|at| *at > cutoff);

        if bucket.requests.len() >= self.max_requests {
            return false;
        }

        bucket.requests.push(now);
        true
    }

    fn cleanup(&self) {
        let mut clients = self.clients.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        let expiry = self.client_expiry;
        let before = clients.len();
        clients.retain(|_, bucket| now.duration_since(bucket.last_seen) < expiry);
        let swept = before - clients.len();
        if swept > 0 {
            tracing::debug!(swept, remaining = clients.len(), "rate limiter cleanup");
        }
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.clients.lock().unwrap().len()
    }
}

/// Axum middleware enforcing the per-IP budget.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if limiter.allow(addr.ip()) {
        next.run(request).await
    } else {
        tracing::warn!(client = %addr.ip(), "rate limit exceeded");
        (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_secs: u64) -> Arc<RateLimiter> {
        Arc::new(RateLimiter {
            clients: Mutex::new(HashMap::new()),
            max_requests: max as usize,
            window: Duration::from_secs(window_secs),
            client_expiry: Duration::from_secs(600),
        })
    }

    #[test]
    fn allows_within_budget() {
        let limiter = limiter(3, 60);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        assert!(limiter.allow(ip));
        assert!(limiter.allow(ip));
        assert!(limiter.allow(ip));
        assert!(!limiter.allow(ip));
    }

    #[test]
    fn budgets_are_per_client() {
        let limiter = limiter(1, 60);
        let first: IpAddr = "10.0.0.1".parse().unwrap();
        let second: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.allow(first));
        assert!(!limiter.allow(first));
        assert!(limiter.allow(second));
    }

    #[test]
    fn window_expiry_refills_budget() {
        let limiter = Arc::new(RateLimiter {
            clients: Mutex::new(HashMap::new()),
            max_requests: 1,
            window: Duration::from_millis(30),
            client_expiry: Duration::from_secs(600),
        });
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        assert!(limiter.allow(ip));
        assert!(!limiter.allow(ip));
        std::thread::sleep(Duration::from_millis(50));
        assert!(limiter.allow(ip));
    }

    #[test]
    fn cleanup_drops_idle_clients() {
        let limiter = Arc::new(RateLimiter {
            clients: Mutex::new(HashMap::new()),
            max_requests: 10,
            window: Duration::from_secs(1),
            client_expiry: Duration::from_millis(20),
        });
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        limiter.allow(ip);
        assert_eq!(limiter.tracked_clients(), 1);

        std::thread::sleep(Duration::from_millis(40));
        limiter.cleanup();
        assert_eq!(limiter.tracked_clients(), 0);
    }
}

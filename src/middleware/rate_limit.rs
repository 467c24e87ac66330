//! Rate Limiting Middleware
//!
//! Fixed-window request budget per client address. The limiter is an owned
//! value shared through router state; a background task evicts idle windows.
//!
//! Clients are keyed on the peer address. Forwarding headers are only
//! honoured when the limiter is told it sits behind a trusted proxy.

use crate::error::AuthError;
use crate::extractors::{client_ip, peer_ip};

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

/// Per-client fixed-window rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    trusted_proxy: bool,
    clients: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            trusted_proxy: false,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Key clients on X-Forwarded-For / X-Real-IP set by a fronting proxy
    pub fn with_trusted_proxy(mut self, trusted: bool) -> Self {
        self.trusted_proxy = trusted;
        self
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Key identifying the client that sent `req`
    pub fn client_key(&self, req: &Request) -> String {
        let ip = if self.trusted_proxy {
            client_ip(req.headers(), req.extensions())
        } else {
            peer_ip(req.extensions())
        };
        ip.unwrap_or_else(|| "unknown".to_string())
    }

    /// Count one request from `key`
    pub async fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now()).await
    }

    pub async fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut clients = self.clients.lock().await;

        let window = clients.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });

        // Reset if window expired
        if now.saturating_duration_since(window.started) >= self.window {
            window.count = 0;
            window.started = now;
        }

        if window.count >= self.limit {
            let retry_after = self
                .window
                .saturating_sub(now.saturating_duration_since(window.started));
            return RateDecision::Limited { retry_after };
        }

        window.count += 1;
        RateDecision::Allowed {
            remaining: self.limit - window.count,
        }
    }

    /// Drop windows that have fully elapsed. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    pub async fn sweep_at(&self, now: Instant) -> usize {
        let mut clients = self.clients.lock().await;
        let before = clients.len();
        clients.retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        before - clients.len()
    }

    pub async fn tracked_clients(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the handle is aborted
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let evicted = limiter.sweep().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "Rate limit windows evicted");
                }
            }
        })
    }
}

/// Rate limiting middleware
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let client_id = limiter.client_key(&req);

    let remaining = match limiter.check(&client_id).await {
        RateDecision::Allowed { remaining } => remaining,
        RateDecision::Limited { retry_after } => {
            // Round up so clients never retry early
            let retry_after = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            tracing::warn!(client = %client_id, retry_after, "Rate limit exceeded");

            let mut response = AuthError::RateLimited.into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
            return response;
        }
    };

    let mut response = next.run(req).await;

    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", limiter.limit().into());
    headers.insert("x-ratelimit-remaining", remaining.into());

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ConnectInfo;
    use std::net::SocketAddr;

    #[tokio::test]
    async fn test_allows_up_to_limit() {
        let limiter = RateLimiter::per_minute(3);
        let now = Instant::now();

        assert_eq!(limiter.check_at("a", now).await, RateDecision::Allowed { remaining: 2 });
        assert_eq!(limiter.check_at("a", now).await, RateDecision::Allowed { remaining: 1 });
        assert_eq!(limiter.check_at("a", now).await, RateDecision::Allowed { remaining: 0 });

        match limiter.check_at("a", now + Duration::from_secs(20)).await {
            RateDecision::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(40))
            }
            other => panic!("expected limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clients_are_independent() {
        let limiter = RateLimiter::per_minute(1);
        let now = Instant::now();

        assert!(matches!(limiter.check_at("a", now).await, RateDecision::Allowed { .. }));
        assert!(matches!(limiter.check_at("a", now).await, RateDecision::Limited { .. }));
        assert!(matches!(limiter.check_at("b", now).await, RateDecision::Allowed { .. }));
    }

    #[tokio::test]
    async fn test_window_resets() {
        let limiter = RateLimiter::per_minute(1);
        let now = Instant::now();

        limiter.check_at("a", now).await;
        assert!(matches!(
            limiter.check_at("a", now + Duration::from_secs(60)).await,
            RateDecision::Allowed { remaining: 0 }
        ));
    }

    fn request_from(peer: [u8; 4], forwarded_for: &'static str) -> Request {
        let mut req = axum::http::Request::builder()
            .uri("/auth/login")
            .header("x-forwarded-for", forwarded_for)
            .body(axum::body::Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 4000))));
        req
    }

    #[test]
    fn test_client_key_uses_peer_by_default() {
        let limiter = RateLimiter::per_minute(1);
        assert_eq!(limiter.client_key(&request_from([192, 0, 2, 1], "203.0.113.9")), "192.0.2.1");
    }

    #[test]
    fn test_client_key_trusts_forwarding_headers_behind_proxy() {
        let limiter = RateLimiter::per_minute(1).with_trusted_proxy(true);
        assert_eq!(limiter.client_key(&request_from([10, 0, 0, 1], "203.0.113.9")), "203.0.113.9");
    }

    #[tokio::test]
    async fn test_sweep_evicts_elapsed_windows() {
        let limiter = RateLimiter::per_minute(10);
        let now = Instant::now();

        limiter.check_at("old", now).await;
        limiter.check_at("new", now + Duration::from_secs(45)).await;
        assert_eq!(limiter.tracked_clients().await, 2);

        assert_eq!(limiter.sweep_at(now + Duration::from_secs(61)).await, 1);
        assert_eq!(limiter.tracked_clients().await, 1);
    }
}

//! Rate limiting middleware using token buckets.
//!
//! Per-IP limiting with separate budgets for reads and for mutating HTTP
//! methods. The number of tracked clients is bounded; when the table is
//! full, stale buckets are dropped first and then the least recently seen.

use crate::domain::config::RateLimitConfig;
use crate::domain::error::ApiError;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Method, Request},
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tower::{Layer, Service};
use tracing::{debug, warn};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token bucket entry for an IP address
struct TokenBucket {
    read_limiter: DirectLimiter,
    write_limiter: DirectLimiter,
    /// Last access time (for cleanup)
    last_access: Instant,
}

fn quota(per_second: u32, burst: u32) -> Quota {
    let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst).unwrap_or(rate);
    Quota::per_second(rate).allow_burst(burst)
}

impl TokenBucket {
    fn new(config: &RateLimitConfig) -> Self {
        Self {
            read_limiter: RateLimiter::direct(quota(config.requests_per_second, config.burst_size)),
            write_limiter: RateLimiter::direct(quota(
                config.writes_per_second,
                config.write_burst_size,
            )),
            last_access: Instant::now(),
        }
    }

    fn check(&mut self, is_write: bool) -> Result<(), Duration> {
        self.last_access = Instant::now();
        let limiter = if is_write {
            &self.write_limiter
        } else {
            &self.read_limiter
        };
        limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
    }
}

/// Rate limiter state shared across requests
pub struct RateLimitState {
    /// Per-IP token buckets
    buckets: DashMap<IpAddr, TokenBucket>,
    config: RateLimitConfig,
}

impl RateLimitState {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
        }
    }

    /// Check if a request should be admitted; `Err` carries the wait time.
    pub fn check(&self, ip: IpAddr, is_write: bool) -> Result<(), Duration> {
        if !self.config.enabled || self.config.whitelist.contains(&ip) {
            return Ok(());
        }

        if !self.buckets.contains_key(&ip) && self.buckets.len() >= self.config.max_tracked_clients
        {
            self.make_room();
        }

        let mut bucket = self.buckets.entry(ip).or_insert_with(|| {
            debug!(ip = %ip, "Creating new rate limit bucket");
            TokenBucket::new(&self.config)
        });
        bucket.check(is_write)
    }

    fn make_room(&self) {
        self.cleanup(self.config.bucket_ttl);
        if self.buckets.len() < self.config.max_tracked_clients {
            return;
        }
        let stalest = self
            .buckets
            .iter()
            .min_by_key(|entry| entry.value().last_access)
            .map(|entry| *entry.key());
        if let Some(ip) = stalest {
            debug!(ip = %ip, "Evicting least recently seen client");
            self.buckets.remove(&ip);
        }
    }

    /// Drop buckets idle for longer than `max_age`.
    pub fn cleanup(&self, max_age: Duration) {
        let now = Instant::now();
        self.buckets.retain(|ip, bucket| {
            let age = now.duration_since(bucket.last_access);
            if age > max_age {
                debug!(ip = %ip, age_secs = age.as_secs(), "Removing stale rate limit bucket");
                false
            } else {
                true
            }
        });
    }

    /// Get number of tracked IPs
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Rate limit layer
#[derive(Clone)]
pub struct RateLimitLayer {
    state: Arc<RateLimitState>,
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Arc::new(RateLimitState::new(config)),
        }
    }

    pub fn state(&self) -> Arc<RateLimitState> {
        Arc::clone(&self.state)
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            state: Arc::clone(&self.state),
        }
    }
}

/// Rate limit service
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    state: Arc<RateLimitState>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let state = Arc::clone(&self.state);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let ip = client_ip(&req);
            let is_write = is_write_method(req.method());

            match state.check(ip, is_write) {
                Ok(()) => inner.call(req).await,
                Err(retry_after) => {
                    warn!(
                        ip = %ip,
                        retry_after_ms = retry_after.as_millis() as u64,
                        is_write,
                        "Rate limit exceeded"
                    );
                    Ok(ApiError::rate_limited(retry_after).into_response())
                }
            }
        })
    }
}

fn is_write_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// socket peer.
pub fn client_ip<B>(req: &Request<B>) -> IpAddr {
    let header_ip = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    header_ip("x-forwarded-for")
        .or_else(|| header_ip("x-real-ip"))
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip())
        })
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

/// Periodically drop stale buckets until `shutdown` flips to true.
pub async fn cleanup_task(
    state: Arc<RateLimitState>,
    interval: Duration,
    max_age: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                state.cleanup(max_age);
                debug!(clients = state.bucket_count(), "Rate limit buckets swept");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

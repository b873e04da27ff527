//! Per-IP rate limiting
//!
//! Keyed token-bucket limiter sized from `RATE_LIMIT_MAX` requests per
//! `RATE_LIMIT_WINDOW_SECS`. The key table is swept periodically so idle
//! clients do not accumulate. `/api/health` is exempt.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::error::ApiError;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub type KeyedRateLimiter =
    RateLimiter<IpAddr, dashmap::DashMap<IpAddr, InMemoryState>, DefaultClock, NoOpMiddleware>;

#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<KeyedRateLimiter>,
    clock: DefaultClock,
}

impl RateLimitState {
    pub fn new(max: u32, window: Duration) -> Self {
        let max = NonZeroU32::new(max.max(1)).unwrap_or(NonZeroU32::MIN);
        let window = if window.is_zero() {
            Duration::from_secs(60)
        } else {
            window
        };

        // `max` requests per window: refill one permit every window/max,
        // with the full window available as burst.
        let quota = Quota::with_period(window / max.get())
            .unwrap_or_else(|| Quota::per_second(max))
            .allow_burst(max);

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            clock: DefaultClock::default(),
        }
    }

    /// Seconds until the next permit, if the key is currently over quota.
    pub fn check(&self, key: IpAddr) -> Result<(), u64> {
        match self.limiter.check_key(&key) {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                Err(wait.as_secs().max(1))
            }
        }
    }

    /// Evict buckets that have been idle long enough to be irrelevant.
    /// Spawned once at boot.
    pub fn spawn_sweeper(&self) {
        let limiter = Arc::clone(&self.limiter);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.tick().await;
            loop {
                tick.tick().await;
                limiter.retain_recent();
            }
        });
    }
}

pub async fn rate_limit_middleware(
    axum::extract::State(rate_limit): axum::extract::State<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.uri().path() == "/api/health" {
        return next.run(req).await;
    }

    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    match rate_limit.check(client_ip) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => {
            tracing::debug!(client_ip = %client_ip, retry_after, "rate limit exceeded");
            ApiError::RateLimited { retry_after }.into_response()
        }
    }
}

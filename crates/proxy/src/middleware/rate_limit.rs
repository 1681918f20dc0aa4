//! Pipeline stage 3: token bucket keyed by client IP (forwarded IP when
//! `HTTP_PROXY_COUNT > 0`, else the socket peer IP), per the Open Question
//! resolution.

use crate::state::AppState;
use blobkit_common::{KnownErrorKind, ProxyError};
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

pub type IpRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

pub fn build_limiter(requests: u32, window_secs: u64) -> Arc<IpRateLimiter> {
    let per_second = (requests as f64 / window_secs.max(1) as f64).max(1.0 / window_secs.max(1) as f64);
    let quota = Quota::with_period(std::time::Duration::from_secs_f64(1.0 / per_second))
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::new(1).unwrap()))
        .allow_burst(NonZeroU32::new(requests.max(1)).unwrap());
    Arc::new(RateLimiter::keyed(quota))
}

fn client_ip(request: &Request, http_proxy_count: u32) -> IpAddr {
    if http_proxy_count > 0 {
        if let Some(forwarded) = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            let hops: Vec<&str> = forwarded.split(',').map(str::trim).collect();
            let idx = hops.len().saturating_sub(http_proxy_count as usize);
            if let Some(ip_str) = hops.get(idx) {
                if let Ok(ip) = ip_str.parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::from([0, 0, 0, 0]))
}

pub async fn rate_limit_layer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ProxyError> {
    let ip = client_ip(&request, state.config.http_proxy_count.into());

    if state.limiter.check_key(&ip).is_err() {
        return Err(ProxyError::new(
            KnownErrorKind::RateLimitExceeded,
            "rate limit exceeded",
        ));
    }

    Ok(next.run(request).await)
}

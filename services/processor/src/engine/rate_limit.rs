//! services/processor/src/engine/rate_limit.rs
//!
//! Per-provider call ceilings. Each provider gets its own `governor` limiter
//! with a burst of one, so consecutive calls are spaced by at least the
//! configured interval regardless of which document they belong to.
//!
//! The limiters read time from tokio's clock rather than the system clock,
//! which lets tests drive them with a paused runtime.

use async_trait::async_trait;
use governor::{
    clock::{Clock, Reference},
    middleware::NoOpMiddleware,
    nanos::Nanos,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use session_insight_core::domain::ProviderId;
use std::collections::HashMap;
use std::ops::Add;
use std::time::Duration;
use tracing::debug;

/// A `tokio::time::Instant` usable as a governor time reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TokioInstant(tokio::time::Instant);

impl Add<Nanos> for TokioInstant {
    type Output = Self;

    fn add(self, other: Nanos) -> Self {
        Self(self.0 + Duration::from(other))
    }
}

impl Reference for TokioInstant {
    fn duration_since(&self, earlier: Self) -> Nanos {
        self.0.saturating_duration_since(earlier.0).into()
    }

    fn saturating_sub(&self, duration: Nanos) -> Self {
        self.0.checked_sub(duration.into()).map_or(*self, Self)
    }
}

/// Governor clock backed by tokio's (pausable) time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    type Instant = TokioInstant;

    fn now(&self) -> Self::Instant {
        TokioInstant(tokio::time::Instant::now())
    }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<TokioInstant>>;

/// Gate consulted before every provider call.
#[async_trait]
pub trait CallLimiter: Send + Sync {
    /// Waits until a call to `provider` is allowed.
    async fn acquire(&self, provider: ProviderId);
}

/// Production limiter: one `governor` quota per provider.
pub struct ProviderRateLimiter {
    limiters: HashMap<ProviderId, DirectLimiter>,
}

impl ProviderRateLimiter {
    /// A zero interval leaves that provider unthrottled.
    pub fn new(intervals: impl IntoIterator<Item = (ProviderId, Duration)>) -> Self {
        let limiters = intervals
            .into_iter()
            .filter_map(|(provider, interval)| {
                Quota::with_period(interval)
                    .map(|quota| (provider, RateLimiter::direct_with_clock(quota, TokioClock)))
            })
            .collect();
        Self { limiters }
    }
}

#[async_trait]
impl CallLimiter for ProviderRateLimiter {
    async fn acquire(&self, provider: ProviderId) {
        let Some(limiter) = self.limiters.get(&provider) else {
            return;
        };
        while let Err(not_until) = limiter.check() {
            let wait = not_until.wait_time_from(TokioClock.now());
            debug!(provider = %provider, wait_ms = wait.as_millis() as u64, "Waiting for rate limit slot");
            tokio::time::sleep(wait).await;
        }
    }
}

/// Lets every call through immediately.
#[derive(Clone, Copy, Default)]
pub struct Unlimited;

#[async_trait]
impl CallLimiter for Unlimited {
    async fn acquire(&self, _provider: ProviderId) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn second_call_waits_out_the_interval() {
        let limiter = ProviderRateLimiter::new([(ProviderId::OpenAi, Duration::from_secs(60))]);
        let start = Instant::now();

        limiter.acquire(ProviderId::OpenAi).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        let second = tokio::time::timeout(Duration::from_secs(120), limiter.acquire(ProviderId::OpenAi)).await;
        assert!(second.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn ceilings_are_independent_per_provider() {
        let limiter = ProviderRateLimiter::new([
            (ProviderId::OpenAi, Duration::from_secs(3600)),
            (ProviderId::Anthropic, Duration::from_secs(3600)),
        ]);
        let start = Instant::now();

        limiter.acquire(ProviderId::OpenAi).await;
        limiter.acquire(ProviderId::Anthropic).await;

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_ceiling() {
        let limiter = Arc::new(ProviderRateLimiter::new([(ProviderId::Gemini, Duration::from_secs(2))]));
        let start = Instant::now();

        let waits = (0..3).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter.acquire(ProviderId::Gemini).await;
                start.elapsed()
            })
        });
        let mut granted: Vec<Duration> = futures::future::join_all(waits)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        granted.sort();

        assert_eq!(granted[0], Duration::ZERO);
        assert!(granted[1] >= Duration::from_secs(2));
        assert!(granted[2] >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_or_unknown_provider_is_unthrottled() {
        let limiter = ProviderRateLimiter::new([(ProviderId::Gemini, Duration::ZERO)]);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire(ProviderId::Gemini).await;
            limiter.acquire(ProviderId::OpenAi).await;
        }
        Unlimited.acquire(ProviderId::OpenAi).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}

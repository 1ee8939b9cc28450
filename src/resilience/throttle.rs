//! # Throttle Guard
//!
//! Fixed-window attempt counter per `(provider, channel)`, shared through the
//! counter store. Jobs consult it before contacting a provider and release
//! themselves back to the queue when the window is exhausted.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::constants::{jobs, keys};
use crate::models::Channel;
use crate::store::{CounterStore, StoreError, StoreResult};

/// Rate limiting seam injected into jobs
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Whether the window is exhausted; never increments
    async fn should_throttle(&self, provider: &str, channel: Channel, limit: &RateLimitConfig)
        -> bool;

    /// Count one attempt; returns the attempts recorded in the current window
    async fn hit(&self, provider: &str, channel: Channel, limit: &RateLimitConfig) -> u64;

    async fn remaining_attempts(
        &self,
        provider: &str,
        channel: Channel,
        limit: &RateLimitConfig,
    ) -> u64;

    /// Time until the current window resets, `None` when no window is open
    async fn reset_time(&self, provider: &str, channel: Channel) -> Option<Duration>;

    /// Delay before a throttled job should run again
    async fn release_delay(
        &self,
        provider: &str,
        channel: Channel,
        limit: &RateLimitConfig,
    ) -> Duration {
        match self.reset_time(provider, channel).await {
            Some(ttl) => ttl + Duration::from_secs(jobs::THROTTLE_RELEASE_BUFFER_SECONDS),
            None => limit.window(),
        }
    }
}

/// [`RateLimiter`] over the shared counter store
#[derive(Clone)]
pub struct ThrottleGuard {
    store: Arc<dyn CounterStore>,
    key_prefix: String,
    store_timeout: Duration,
}

impl std::fmt::Debug for ThrottleGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleGuard")
            .field("key_prefix", &self.key_prefix)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl ThrottleGuard {
    pub fn new(
        store: Arc<dyn CounterStore>,
        key_prefix: impl Into<String>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            store_timeout,
        }
    }

    fn key(&self, provider: &str, channel: Channel) -> String {
        format!("{}:{}:{}:{}", self.key_prefix, keys::THROTTLE, provider, channel)
    }

    async fn bounded<T>(&self, op: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        tokio::time::timeout(self.store_timeout, op)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.store_timeout.as_millis() as u64)))
    }

    fn fail_open(provider: &str, channel: Channel, operation: &str, error: &StoreError) {
        warn!(
            provider = %provider,
            channel = %channel,
            operation = %operation,
            error = %error,
            "⚠️ Throttle store unavailable - not throttling"
        );
    }

    async fn current(&self, provider: &str, channel: Channel) -> StoreResult<u64> {
        let count = self.bounded(self.store.get(&self.key(provider, channel))).await?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }
}

#[async_trait]
impl RateLimiter for ThrottleGuard {
    async fn should_throttle(
        &self,
        provider: &str,
        channel: Channel,
        limit: &RateLimitConfig,
    ) -> bool {
        match self.current(provider, channel).await {
            Ok(count) => {
                let throttled = count >= limit.max_attempts;
                if throttled {
                    debug!(
                        provider = %provider,
                        channel = %channel,
                        attempts = count,
                        max_attempts = limit.max_attempts,
                        "⏳ Provider throttled"
                    );
                }
                throttled
            }
            Err(e) => {
                Self::fail_open(provider, channel, "should_throttle", &e);
                false
            }
        }
    }

    async fn hit(&self, provider: &str, channel: Channel, limit: &RateLimitConfig) -> u64 {
        let key = self.key(provider, channel);
        match self
            .bounded(self.store.incr_with_ttl(&key, limit.window()))
            .await
        {
            Ok(count) => count.max(0) as u64,
            Err(e) => {
                Self::fail_open(provider, channel, "hit", &e);
                0
            }
        }
    }

    async fn remaining_attempts(
        &self,
        provider: &str,
        channel: Channel,
        limit: &RateLimitConfig,
    ) -> u64 {
        match self.current(provider, channel).await {
            Ok(count) => limit.max_attempts.saturating_sub(count),
            Err(e) => {
                Self::fail_open(provider, channel, "remaining_attempts", &e);
                limit.max_attempts
            }
        }
    }

    async fn reset_time(&self, provider: &str, channel: Channel) -> Option<Duration> {
        match self.bounded(self.store.ttl(&self.key(provider, channel))).await {
            Ok(ttl) => ttl,
            Err(e) => {
                Self::fail_open(provider, channel, "reset_time", &e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCounterStore;
    use crate::utils::ManualClock;

    fn guard() -> (ThrottleGuard, Arc<ManualClock>, Arc<InMemoryCounterStore>) {
        let clock = ManualClock::starting_now();
        let store = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
        let guard = ThrottleGuard::new(store.clone(), "test", Duration::from_millis(250));
        (guard, clock, store)
    }

    fn limit(max_attempts: u64, window_seconds: u64) -> RateLimitConfig {
        RateLimitConfig {
            max_attempts,
            window_seconds,
        }
    }

    #[tokio::test]
    async fn test_throttles_after_max_attempts_until_window_elapses() {
        let (guard, clock, _) = guard();
        let limit = limit(2, 1);

        assert!(!guard.should_throttle("beem", Channel::Sms, &limit).await);
        guard.hit("beem", Channel::Sms, &limit).await;
        assert!(!guard.should_throttle("beem", Channel::Sms, &limit).await);
        guard.hit("beem", Channel::Sms, &limit).await;
        assert!(guard.should_throttle("beem", Channel::Sms, &limit).await);
        guard.hit("beem", Channel::Sms, &limit).await;
        assert!(guard.should_throttle("beem", Channel::Sms, &limit).await);

        clock.advance_secs(1);
        assert!(!guard.should_throttle("beem", Channel::Sms, &limit).await);
    }

    #[tokio::test]
    async fn test_counters_are_per_provider_and_channel() {
        let (guard, _, _) = guard();
        let limit = limit(1, 60);

        guard.hit("beem", Channel::Sms, &limit).await;
        assert!(guard.should_throttle("beem", Channel::Sms, &limit).await);
        assert!(!guard.should_throttle("beem", Channel::Whatsapp, &limit).await);
        assert!(!guard.should_throttle("termii", Channel::Sms, &limit).await);
    }

    #[tokio::test]
    async fn test_should_throttle_does_not_count() {
        let (guard, _, _) = guard();
        let limit = limit(3, 60);
        for _ in 0..5 {
            guard.should_throttle("beem", Channel::Sms, &limit).await;
        }
        assert_eq!(guard.remaining_attempts("beem", Channel::Sms, &limit).await, 3);
        assert_eq!(guard.hit("beem", Channel::Sms, &limit).await, 1);
        assert_eq!(guard.remaining_attempts("beem", Channel::Sms, &limit).await, 2);
    }

    #[tokio::test]
    async fn test_release_delay_uses_remaining_ttl() {
        let (guard, clock, _) = guard();
        let limit = limit(1, 60);

        assert_eq!(
            guard.release_delay("beem", Channel::Sms, &limit).await,
            Duration::from_secs(60)
        );

        guard.hit("beem", Channel::Sms, &limit).await;
        clock.advance_secs(20);
        assert_eq!(
            guard.reset_time("beem", Channel::Sms).await,
            Some(Duration::from_secs(40))
        );
        assert_eq!(
            guard.release_delay("beem", Channel::Sms, &limit).await,
            Duration::from_secs(41)
        );
    }

    #[tokio::test]
    async fn test_store_outage_never_throttles() {
        let (guard, _, store) = guard();
        let limit = limit(1, 60);
        guard.hit("beem", Channel::Sms, &limit).await;
        assert!(guard.should_throttle("beem", Channel::Sms, &limit).await);

        store.set_offline(true);
        assert!(!guard.should_throttle("beem", Channel::Sms, &limit).await);
        assert_eq!(guard.hit("beem", Channel::Sms, &limit).await, 0);
        assert_eq!(guard.remaining_attempts("beem", Channel::Sms, &limit).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out_and_never_throttles() {
        let (guard, _, store) = guard();
        let limit = limit(1, 60);
        guard.hit("beem", Channel::Sms, &limit).await;
        assert!(guard.should_throttle("beem", Channel::Sms, &limit).await);

        store.set_stall(Duration::from_secs(5));
        let started = tokio::time::Instant::now();
        assert!(!guard.should_throttle("beem", Channel::Sms, &limit).await);
        assert_eq!(guard.hit("beem", Channel::Sms, &limit).await, 0);
        assert_eq!(guard.remaining_attempts("beem", Channel::Sms, &limit).await, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}

//! # Provider Health Monitor
//!
//! Per-provider circuit breaker and rolling health score. State lives in the
//! shared counter store as one hash per provider, so every worker process
//! sees the same circuit.
//!
//! ```text
//!            failures >= threshold               timeout elapsed
//!  Closed ───────────────────────────▶ Open ─────────────────────▶ HalfOpen
//!    ▲                                   ▲                            │
//!    │        successes >= threshold     │        any failure         │
//!    └───────────────────────────────────┼────────────────────────────┤
//!                                        └────────────────────────────┘
//! ```
//!
//! Every store call is bounded by `health.store_timeout_ms`. When the store is
//! unreachable the monitor fails open: providers are reported available and
//! the missed observation is only logged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::HealthConfig;
use crate::constants::{health, keys};
use crate::models::provider_health::format_timestamp;
use crate::models::{CircuitState, ProviderHealthRecord};
use crate::store::{CounterStore, StoreError, StoreResult};
use crate::utils::SharedClock;

type Record = ProviderHealthRecord;

/// Snapshot of one provider's health for operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub circuit_state: CircuitState,
    pub available: bool,
    pub health_score: f64,
    pub failure_count: u64,
    pub success_count: u64,
    pub total_requests: u64,
    pub success_rate: Option<f64>,
    pub average_response_time_ms: f64,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Health score in `[0, 100]` derived from a record
pub fn compute_health_score(record: &ProviderHealthRecord) -> f64 {
    let base = record.success_rate().map(|r| r * 100.0).unwrap_or(100.0);
    let capped = match record.circuit_state {
        CircuitState::Open => base.min(health::OPEN_SCORE_CAP),
        CircuitState::HalfOpen => base.min(health::HALF_OPEN_SCORE_CAP),
        CircuitState::Closed => base,
    };
    (capped - health::FAILURE_PENALTY * record.failure_count as f64).clamp(0.0, 100.0)
}

#[derive(Clone)]
pub struct HealthMonitor {
    store: Arc<dyn CounterStore>,
    config: HealthConfig,
    clock: SharedClock,
    key_prefix: String,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn CounterStore>,
        config: HealthConfig,
        key_prefix: impl Into<String>,
        clock: SharedClock,
    ) -> Self {
        info!(
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            timeout_seconds = config.timeout_seconds,
            "🛡️ Provider health monitor initialized"
        );

        Self {
            store,
            config,
            clock,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn key(&self, provider: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, keys::HEALTH, provider)
    }

    async fn bounded<T>(&self, op: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        tokio::time::timeout(self.config.store_timeout(), op)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.config.store_timeout_ms)))
    }

    /// Current record, propagating store errors
    pub async fn try_record(&self, provider: &str) -> StoreResult<ProviderHealthRecord> {
        let fields = self
            .bounded(self.store.hash_get_all(&self.key(provider)))
            .await?;
        Ok(Record::from_fields(&fields))
    }

    /// Current record; a closed default when the store is unreachable
    pub async fn record(&self, provider: &str) -> ProviderHealthRecord {
        match self.try_record(provider).await {
            Ok(record) => record,
            Err(e) => {
                self.fail_open(provider, "read_record", &e);
                Record::default()
            }
        }
    }

    pub async fn circuit_state(&self, provider: &str) -> CircuitState {
        self.record(provider).await.circuit_state
    }

    fn fail_open(&self, provider: &str, operation: &str, error: &StoreError) {
        warn!(
            provider = %provider,
            operation = %operation,
            error = %error,
            "⚠️ Health store unavailable - failing open"
        );
    }

    async fn set_fields(&self, provider: &str, fields: &[(String, String)]) -> StoreResult<()> {
        self.bounded(
            self.store
                .hash_set(&self.key(provider), fields, self.config.record_ttl()),
        )
        .await
    }

    async fn incr(&self, provider: &str, field: &str) -> StoreResult<i64> {
        self.bounded(
            self.store
                .hash_incr(&self.key(provider), field, 1, self.config.record_ttl()),
        )
        .await
    }

    /// Record a successful provider call
    pub async fn record_success(&self, provider: &str, response_time_ms: u64) {
        if let Err(e) = self.apply_success(provider, response_time_ms).await {
            self.fail_open(provider, "record_success", &e);
        }
    }

    async fn apply_success(&self, provider: &str, response_time_ms: u64) -> StoreResult<()> {
        let record = self.try_record(provider).await?;
        let now = self.clock.now();

        self.incr(provider, Record::TOTAL_REQUESTS).await?;
        let successes = self.incr(provider, Record::SUCCESSFUL_REQUESTS).await?.max(1);
        let average = record.average_response_time_ms
            + (response_time_ms as f64 - record.average_response_time_ms) / successes as f64;

        let mut fields = vec![
            (Record::LAST_SUCCESS.to_string(), format_timestamp(Some(now))),
            (Record::AVERAGE_RESPONSE_TIME_MS.to_string(), format!("{average:.2}")),
        ];

        match record.circuit_state {
            CircuitState::Closed => {
                fields.push((Record::FAILURE_COUNT.to_string(), "0".to_string()));
                self.set_fields(provider, &fields).await?;
                self.incr(provider, Record::SUCCESS_COUNT).await?;
            }
            CircuitState::HalfOpen => {
                self.set_fields(provider, &fields).await?;
                let successes = self.incr(provider, Record::SUCCESS_COUNT).await?;
                if successes >= i64::from(self.config.success_threshold) {
                    self.transition_to_closed(provider).await?;
                }
            }
            CircuitState::Open => {
                self.set_fields(provider, &fields).await?;
                debug!(provider = %provider, "Success recorded while circuit is open");
            }
        }

        debug!(
            provider = %provider,
            response_time_ms = response_time_ms,
            "🟢 Provider call succeeded"
        );
        Ok(())
    }

    /// Record a failed provider call
    pub async fn record_failure(&self, provider: &str, error: &str) {
        if let Err(e) = self.apply_failure(provider, error).await {
            self.fail_open(provider, "record_failure", &e);
        }
    }

    async fn apply_failure(&self, provider: &str, error: &str) -> StoreResult<()> {
        let record = self.try_record(provider).await?;
        let now = self.clock.now();

        self.incr(provider, Record::TOTAL_REQUESTS).await?;
        let failures = self.incr(provider, Record::FAILURE_COUNT).await?;
        self.set_fields(
            provider,
            &[
                (Record::LAST_FAILURE.to_string(), format_timestamp(Some(now))),
                (Record::LAST_ERROR.to_string(), error.to_string()),
            ],
        )
        .await?;

        error!(
            provider = %provider,
            failure_count = failures,
            error = %error,
            "🔴 Provider call failed"
        );

        match record.circuit_state {
            CircuitState::Closed if failures >= i64::from(self.config.failure_threshold) => {
                self.transition_to_open(provider, failures).await
            }
            CircuitState::HalfOpen => self.transition_to_open(provider, failures).await,
            _ => Ok(()),
        }
    }

    /// Whether traffic may be sent to `provider`. An open circuit whose
    /// timeout has elapsed moves to half-open here.
    pub async fn is_available(&self, provider: &str) -> bool {
        let record = match self.try_record(provider).await {
            Ok(record) => record,
            Err(e) => {
                self.fail_open(provider, "is_available", &e);
                return true;
            }
        };

        match record.circuit_state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let Some(opened_at) = record.opened_at else {
                    warn!(provider = %provider, "Circuit open but no timestamp recorded");
                    return true;
                };
                let elapsed = self.clock.now() - opened_at;
                if elapsed.num_seconds() >= self.config.timeout_seconds as i64 {
                    if let Err(e) = self.transition_to_half_open(provider).await {
                        self.fail_open(provider, "transition_to_half_open", &e);
                    }
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Recent failures reached the threshold and the latest one is still
    /// within the cool-down window
    pub fn in_failure_cooldown(&self, record: &ProviderHealthRecord) -> bool {
        if record.failure_count < u64::from(self.config.failure_threshold) {
            return false;
        }
        record.last_failure.is_some_and(|at| {
            (self.clock.now() - at).num_seconds() < self.config.timeout_seconds as i64
        })
    }

    /// Health score in `[0, 100]`; 100 when the store is unreachable
    pub async fn health_score(&self, provider: &str) -> f64 {
        compute_health_score(&self.record(provider).await)
    }

    /// Snapshot of every listed provider
    pub async fn health_report<I, S>(&self, providers: I) -> Vec<ProviderHealth>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = Vec::new();
        for provider in providers {
            let provider = provider.as_ref();
            let available = self.is_available(provider).await;
            let record = self.record(provider).await;
            report.push(ProviderHealth {
                provider: provider.to_string(),
                circuit_state: record.circuit_state,
                available,
                health_score: compute_health_score(&record),
                failure_count: record.failure_count,
                success_count: record.success_count,
                total_requests: record.total_requests,
                success_rate: record.success_rate(),
                average_response_time_ms: record.average_response_time_ms,
                opened_at: record.opened_at,
                last_success: record.last_success,
                last_failure: record.last_failure,
                last_error: record.last_error,
            });
        }
        report
    }

    /// Operator reset: forget everything known about `provider`
    pub async fn reset(&self, provider: &str) {
        warn!(provider = %provider, "🚨 Provider health manually reset");
        if let Err(e) = self.bounded(self.store.delete(&self.key(provider))).await {
            self.fail_open(provider, "reset", &e);
        }
    }

    async fn transition_to_open(&self, provider: &str, failures: i64) -> StoreResult<()> {
        let now = self.clock.now();
        self.set_fields(
            provider,
            &[
                (Record::CIRCUIT_STATE.to_string(), CircuitState::Open.to_string()),
                (Record::OPENED_AT.to_string(), format_timestamp(Some(now))),
                (Record::SUCCESS_COUNT.to_string(), "0".to_string()),
            ],
        )
        .await?;

        error!(
            provider = %provider,
            consecutive_failures = failures,
            failure_threshold = self.config.failure_threshold,
            timeout_seconds = self.config.timeout_seconds,
            "🔴 Provider circuit opened"
        );
        Ok(())
    }

    async fn transition_to_half_open(&self, provider: &str) -> StoreResult<()> {
        self.set_fields(
            provider,
            &[
                (Record::CIRCUIT_STATE.to_string(), CircuitState::HalfOpen.to_string()),
                (Record::SUCCESS_COUNT.to_string(), "0".to_string()),
            ],
        )
        .await?;

        info!(
            provider = %provider,
            success_threshold = self.config.success_threshold,
            "🟡 Provider circuit half-open (testing recovery)"
        );
        Ok(())
    }

    async fn transition_to_closed(&self, provider: &str) -> StoreResult<()> {
        let record = Record {
            circuit_state: CircuitState::Closed,
            ..Record::default()
        };
        self.set_fields(provider, &record.circuit_fields()).await?;

        info!(provider = %provider, "🟢 Provider circuit closed (recovered)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCounterStore;
    use crate::utils::clock::Clock;
    use crate::utils::ManualClock;
    use std::time::Duration;

    fn monitor() -> (HealthMonitor, Arc<ManualClock>, Arc<InMemoryCounterStore>) {
        let clock = ManualClock::starting_now();
        let store = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
        let monitor = HealthMonitor::new(
            store.clone(),
            HealthConfig::default(),
            "test",
            clock.clone(),
        );
        (monitor, clock, store)
    }

    #[tokio::test]
    async fn test_unknown_provider_is_closed_and_available() {
        let (monitor, _, _) = monitor();
        assert!(monitor.is_available("beem").await);
        assert_eq!(monitor.circuit_state("beem").await, CircuitState::Closed);
        assert_eq!(monitor.health_score("beem").await, 100.0);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures() {
        let (monitor, _, _) = monitor();
        for _ in 0..4 {
            monitor.record_failure("beem", "timeout").await;
        }
        assert!(monitor.is_available("beem").await);

        monitor.record_failure("beem", "timeout").await;
        assert!(!monitor.is_available("beem").await);
        assert_eq!(monitor.circuit_state("beem").await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count_when_closed() {
        let (monitor, _, _) = monitor();
        for _ in 0..4 {
            monitor.record_failure("beem", "timeout").await;
        }
        monitor.record_success("beem", 120).await;
        monitor.record_failure("beem", "timeout").await;

        let record = monitor.record("beem").await;
        assert_eq!(record.circuit_state, CircuitState::Closed);
        assert_eq!(record.failure_count, 1);
        assert_eq!(record.total_requests, 6);
        assert_eq!(record.successful_requests, 1);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout_then_closes() {
        let (monitor, clock, _) = monitor();
        for _ in 0..5 {
            monitor.record_failure("beem", "timeout").await;
        }
        clock.advance_secs(59);
        assert!(!monitor.is_available("beem").await);

        clock.advance_secs(1);
        assert!(monitor.is_available("beem").await);
        assert_eq!(monitor.circuit_state("beem").await, CircuitState::HalfOpen);

        monitor.record_success("beem", 100).await;
        monitor.record_success("beem", 100).await;
        assert_eq!(monitor.circuit_state("beem").await, CircuitState::HalfOpen);
        monitor.record_success("beem", 100).await;

        let record = monitor.record("beem").await;
        assert_eq!(record.circuit_state, CircuitState::Closed);
        assert_eq!(record.failure_count, 0);
        assert_eq!(record.success_count, 0);
    }

    #[tokio::test]
    async fn test_failure_in_half_open_reopens() {
        let (monitor, clock, _) = monitor();
        for _ in 0..5 {
            monitor.record_failure("beem", "timeout").await;
        }
        clock.advance_secs(60);
        assert!(monitor.is_available("beem").await);
        monitor.record_success("beem", 100).await;
        monitor.record_success("beem", 100).await;

        clock.advance_secs(5);
        monitor.record_failure("beem", "connection reset").await;

        let record = monitor.record("beem").await;
        assert_eq!(record.circuit_state, CircuitState::Open);
        assert_eq!(record.opened_at, Some(clock.now()));
        assert_eq!(record.success_count, 0);
        assert!(!monitor.is_available("beem").await);
    }

    #[tokio::test]
    async fn test_health_score_caps_and_penalties() {
        let mut record = ProviderHealthRecord {
            total_requests: 10,
            successful_requests: 9,
            ..Default::default()
        };
        assert!((compute_health_score(&record) - 90.0).abs() < 1e-9);

        record.failure_count = 2;
        assert!((compute_health_score(&record) - 80.0).abs() < 1e-9);

        record.circuit_state = CircuitState::HalfOpen;
        assert!((compute_health_score(&record) - 65.0).abs() < 1e-9);

        record.circuit_state = CircuitState::Open;
        record.failure_count = 5;
        assert_eq!(compute_health_score(&record), 0.0);
    }

    #[tokio::test]
    async fn test_average_response_time() {
        let (monitor, _, _) = monitor();
        monitor.record_success("beem", 100).await;
        monitor.record_success("beem", 300).await;
        let record = monitor.record("beem").await;
        assert!((record.average_response_time_ms - 200.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let (monitor, _, store) = monitor();
        for _ in 0..5 {
            monitor.record_failure("beem", "timeout").await;
        }
        assert!(!monitor.is_available("beem").await);

        store.set_offline(true);
        assert!(monitor.is_available("beem").await);
        monitor.record_failure("beem", "timeout").await;
        assert_eq!(monitor.health_score("beem").await, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out_and_fails_open() {
        let (monitor, _, store) = monitor();
        for _ in 0..5 {
            monitor.record_failure("beem", "timeout").await;
        }
        assert!(!monitor.is_available("beem").await);

        store.set_stall(Duration::from_secs(5));
        let started = tokio::time::Instant::now();
        assert!(monitor.is_available("beem").await);
        assert!(started.elapsed() < Duration::from_secs(5));

        assert!(matches!(
            monitor.try_record("beem").await,
            Err(StoreError::Timeout(ms)) if ms == HealthConfig::default().store_timeout_ms
        ));
        monitor.record_failure("beem", "timeout").await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_reset_and_report() {
        let (monitor, _, _) = monitor();
        for _ in 0..5 {
            monitor.record_failure("beem", "timeout").await;
        }
        let report = monitor.health_report(["beem", "termii"]).await;
        assert_eq!(report.len(), 2);
        assert!(!report[0].available);
        assert_eq!(report[0].last_error.as_deref(), Some("timeout"));
        assert!(report[1].available);

        monitor.reset("beem").await;
        assert!(monitor.is_available("beem").await);
    }

    #[tokio::test]
    async fn test_failure_cooldown() {
        let (monitor, clock, _) = monitor();
        for _ in 0..5 {
            monitor.record_failure("beem", "timeout").await;
        }
        let record = monitor.record("beem").await;
        assert!(monitor.in_failure_cooldown(&record));

        clock.advance_secs(60);
        assert!(!monitor.in_failure_cooldown(&record));
    }
}

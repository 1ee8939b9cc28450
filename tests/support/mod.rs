#![allow(dead_code)]

use std::sync::Arc;

use notify_gateway::config::HealthConfig;
use notify_gateway::resilience::HealthMonitor;
use notify_gateway::store::InMemoryCounterStore;
use notify_gateway::utils::ManualClock;

/// Route test logs through the test harness; repeated calls are harmless
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Health monitor over an in-memory store with the default thresholds
pub fn health_monitor() -> (HealthMonitor, Arc<InMemoryCounterStore>, Arc<ManualClock>) {
    let clock = ManualClock::starting_now();
    let store = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
    let monitor = HealthMonitor::new(store.clone(), HealthConfig::default(), "test", clock.clone());
    (monitor, store, clock)
}

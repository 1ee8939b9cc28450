//! # Resilience Module
//!
//! Protects providers and the gateway itself from overload and cascading
//! failure. Both components keep their state in the shared counter store and
//! fail open when it cannot be reached.
//!
//! - [`HealthMonitor`]: per-provider circuit breaker and rolling health score
//! - [`ThrottleGuard`]: per `(provider, channel)` attempt window behind the
//!   [`RateLimiter`] seam
//!
//! ## Usage
//!
//! ```rust
//! use notify_gateway::config::HealthConfig;
//! use notify_gateway::resilience::HealthMonitor;
//! use notify_gateway::store::InMemoryCounterStore;
//! use notify_gateway::utils::SystemClock;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let monitor = HealthMonitor::new(
//!     Arc::new(InMemoryCounterStore::new()),
//!     HealthConfig::default(),
//!     "notify",
//!     SystemClock::shared(),
//! );
//!
//! monitor.record_failure("beem", "connection reset").await;
//! assert!(monitor.is_available("beem").await);
//! # }
//! ```

pub mod health_monitor;
pub mod throttle;

pub use health_monitor::{compute_health_score, HealthMonitor, ProviderHealth};
pub use throttle::{RateLimiter, ThrottleGuard};

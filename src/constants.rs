//! # System Constants
//!
//! Default thresholds, job policies, header names and key prefixes shared by
//! the dispatch engine. Every default here can be overridden through
//! [`crate::config::GatewayConfig`]; the constants only seed `Default` impls.

/// Circuit breaker and health tracking defaults
pub mod health {
    /// Consecutive failures that open a closed circuit
    pub const FAILURE_THRESHOLD: u32 = 5;
    /// Consecutive half-open successes that close the circuit
    pub const SUCCESS_THRESHOLD: u32 = 3;
    /// Seconds an open circuit rejects traffic before a half-open trial
    pub const TIMEOUT_SECONDS: u64 = 60;
    /// Idle lifetime of a provider health record
    pub const RECORD_TTL_SECONDS: u64 = 24 * 60 * 60;
    /// Upper bound for a single shared-store round trip
    pub const STORE_TIMEOUT_MS: u64 = 250;
    /// Score points removed per recorded failure
    pub const FAILURE_PENALTY: f64 = 5.0;
    /// Score ceiling while the circuit is open
    pub const OPEN_SCORE_CAP: f64 = 25.0;
    /// Score ceiling while the circuit is half-open
    pub const HALF_OPEN_SCORE_CAP: f64 = 75.0;
}

/// Provider selection scoring
pub mod selection {
    /// Numerator of the latency bonus: `priority + LATENCY_WEIGHT / max(avg_ms, 1)`
    pub const LATENCY_WEIGHT: f64 = 1000.0;
}

/// Queue job policies
pub mod jobs {
    pub const DISPATCH_TIMEOUT_SECONDS: u64 = 120;
    pub const DISPATCH_MAX_TRIES: u32 = 3;
    pub const DISPATCH_BACKOFF_SECONDS: [u64; 3] = [30, 60, 120];

    pub const FAILOVER_TIMEOUT_SECONDS: u64 = 180;
    pub const FAILOVER_MAX_TRIES: u32 = 5;
    pub const FAILOVER_BACKOFF_SECONDS: [u64; 5] = [30, 60, 120, 300, 600];

    pub const WEBHOOK_TIMEOUT_SECONDS: u64 = 60;
    pub const WEBHOOK_MAX_TRIES: u32 = 5;
    pub const WEBHOOK_BACKOFF_SECONDS: [u64; 5] = [30, 60, 180, 600, 1800];

    pub const STATUS_UPDATE_TIMEOUT_SECONDS: u64 = 30;
    pub const STATUS_UPDATE_MAX_TRIES: u32 = 3;
    pub const STATUS_UPDATE_BACKOFF_SECONDS: [u64; 3] = [10, 30, 60];

    /// Added to a throttle counter's remaining TTL before a job is released
    pub const THROTTLE_RELEASE_BUFFER_SECONDS: u64 = 1;
}

/// Worker pool defaults
pub mod workers {
    pub const WORKER_COUNT: usize = 4;
    pub const QUEUE_CAPACITY: usize = 1024;
    pub const SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;
}

/// Outbound webhook wire format
pub mod webhook {
    pub const HEADER_EVENT: &str = "X-Webhook-Event";
    pub const HEADER_MESSAGE_ID: &str = "X-Message-ID";
    pub const HEADER_ATTEMPT: &str = "X-Delivery-Attempt";
    pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";
    pub const HEADER_TIMESTAMP: &str = "X-Timestamp";
    pub const SIGNATURE_FIELD: &str = "signature";
    pub const SIGNATURE_PREFIX: &str = "sha256=";
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;
    pub const MIN_SECRET_LENGTH: usize = 16;
    pub const USER_AGENT: &str = concat!("notify-gateway/", env!("CARGO_PKG_VERSION"));
}

/// Shared counter store key layout
pub mod keys {
    pub const DEFAULT_PREFIX: &str = "notify";
    pub const HEALTH: &str = "provider_health";
    pub const THROTTLE: &str = "throttle";
}

/// Dispatch defaults
pub mod dispatch {
    pub const ADAPTER_TIMEOUT_SECONDS: u64 = 30;
}

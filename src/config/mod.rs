//! # Gateway Configuration System
//!
//! Typed configuration for the dispatch engine. A single [`GatewayConfig`] is
//! built once at startup by [`ConfigManager`] and handed to each component by
//! reference; nothing reads configuration through global lookups.
//!
//! ## Sources
//!
//! Later sources override earlier ones:
//!
//! 1. Built-in defaults (every section is `#[serde(default)]`)
//! 2. `config/gateway.{toml,yaml,json}`
//! 3. `config/gateway.<environment>.{toml,yaml,json}`
//! 4. `GATEWAY__SECTION__FIELD` environment variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use notify_gateway::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let threshold = manager.config().health.failure_threshold;
//! let dispatch_policy = manager.config().jobs.dispatch.to_policy();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::constants;
use crate::jobs::JobPolicy;
use crate::models::Channel;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Circuit breaker and health tracking
    pub health: HealthConfig,

    /// Provider lists per channel
    pub providers: ProvidersConfig,

    /// Retry policies per job type
    pub jobs: JobsConfig,

    /// Worker pool sizing
    pub workers: WorkerPoolConfig,

    /// Outbound webhook delivery
    pub webhook: WebhookConfig,

    /// Synchronous dispatch path
    pub dispatch: DispatchConfig,

    /// Shared counter store
    pub store: StoreConfig,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Number of successful half-open calls that close the circuit
    pub success_threshold: u32,

    /// Time to wait in open state before attempting recovery (in seconds)
    pub timeout_seconds: u64,

    /// Idle lifetime of a health record (in seconds)
    pub record_ttl_seconds: u64,

    /// Bound on a single shared-store operation (in milliseconds)
    pub store_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: constants::health::FAILURE_THRESHOLD,
            success_threshold: constants::health::SUCCESS_THRESHOLD,
            timeout_seconds: constants::health::TIMEOUT_SECONDS,
            record_ttl_seconds: constants::health::RECORD_TTL_SECONDS,
            store_timeout_ms: constants::health::STORE_TIMEOUT_MS,
        }
    }
}

impl HealthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_seconds)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Per-provider rate limit enforced by the throttle guard
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_attempts: u64,
    pub window_seconds: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// One configured provider for a channel
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProviderEntry {
    pub id: String,

    /// Higher is preferred
    #[serde(default)]
    pub priority: i64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

fn default_enabled() -> bool {
    true
}

impl ProviderEntry {
    pub fn new(id: impl Into<String>, priority: i64) -> Self {
        Self {
            id: id.into(),
            priority,
            enabled: true,
            rate_limit: None,
        }
    }

    pub fn with_rate_limit(mut self, max_attempts: u64, window_seconds: u64) -> Self {
        self.rate_limit = Some(RateLimitConfig {
            max_attempts,
            window_seconds,
        });
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Ordered provider lists; list order breaks score ties
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProvidersConfig {
    pub sms: Vec<ProviderEntry>,
    pub email: Vec<ProviderEntry>,
    pub whatsapp: Vec<ProviderEntry>,
}

impl ProvidersConfig {
    /// Every configured provider for a channel, disabled ones included
    pub fn for_channel(&self, channel: Channel) -> &[ProviderEntry] {
        match channel {
            Channel::Sms => &self.sms,
            Channel::Email => &self.email,
            Channel::Whatsapp => &self.whatsapp,
        }
    }

    /// Enabled providers in configuration order
    pub fn enabled_for_channel(&self, channel: Channel) -> impl Iterator<Item = &ProviderEntry> {
        self.for_channel(channel).iter().filter(|p| p.enabled)
    }

    pub fn entry(&self, channel: Channel, provider_id: &str) -> Option<&ProviderEntry> {
        self.for_channel(channel).iter().find(|p| p.id == provider_id)
    }

    pub fn with_channel(mut self, channel: Channel, providers: Vec<ProviderEntry>) -> Self {
        match channel {
            Channel::Sms => self.sms = providers,
            Channel::Email => self.email = providers,
            Channel::Whatsapp => self.whatsapp = providers,
        }
        self
    }
}

/// Timeout, tries and backoff schedule of one job type
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct JobPolicyConfig {
    pub timeout_seconds: u64,
    pub max_tries: u32,
    pub backoff_seconds: Vec<u64>,
}

impl JobPolicyConfig {
    fn from_defaults(timeout_seconds: u64, max_tries: u32, backoff_seconds: &[u64]) -> Self {
        Self {
            timeout_seconds,
            max_tries,
            backoff_seconds: backoff_seconds.to_vec(),
        }
    }

    pub fn to_policy(&self) -> JobPolicy {
        JobPolicy {
            timeout: Duration::from_secs(self.timeout_seconds),
            max_tries: self.max_tries,
            backoff: self
                .backoff_seconds
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }

    fn validate(&self, name: &str) -> ConfigResult<()> {
        if self.timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("jobs.{name}.timeout_seconds"),
                self.timeout_seconds,
                "job timeout must be greater than zero",
            ));
        }
        if self.max_tries == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("jobs.{name}.max_tries"),
                self.max_tries,
                "a job needs at least one try",
            ));
        }
        if self.backoff_seconds.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "backoff_seconds",
                format!("jobs.{name}"),
            ));
        }
        Ok(())
    }
}

/// Retry policies per job type
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct JobsConfig {
    pub dispatch: JobPolicyConfig,
    pub failover: JobPolicyConfig,
    pub webhook: JobPolicyConfig,
    pub status_update: JobPolicyConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        use constants::jobs::*;
        Self {
            dispatch: JobPolicyConfig::from_defaults(
                DISPATCH_TIMEOUT_SECONDS,
                DISPATCH_MAX_TRIES,
                &DISPATCH_BACKOFF_SECONDS,
            ),
            failover: JobPolicyConfig::from_defaults(
                FAILOVER_TIMEOUT_SECONDS,
                FAILOVER_MAX_TRIES,
                &FAILOVER_BACKOFF_SECONDS,
            ),
            webhook: JobPolicyConfig::from_defaults(
                WEBHOOK_TIMEOUT_SECONDS,
                WEBHOOK_MAX_TRIES,
                &WEBHOOK_BACKOFF_SECONDS,
            ),
            status_update: JobPolicyConfig::from_defaults(
                STATUS_UPDATE_TIMEOUT_SECONDS,
                STATUS_UPDATE_MAX_TRIES,
                &STATUS_UPDATE_BACKOFF_SECONDS,
            ),
        }
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub shutdown_timeout_seconds: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: constants::workers::WORKER_COUNT,
            queue_capacity: constants::workers::QUEUE_CAPACITY,
            shutdown_timeout_seconds: constants::workers::SHUTDOWN_TIMEOUT_SECONDS,
        }
    }
}

impl WorkerPoolConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

/// Outbound webhook delivery
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WebhookConfig {
    /// HMAC-SHA256 signing secret
    pub secret: Option<String>,
    pub request_timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            request_timeout_seconds: constants::webhook::REQUEST_TIMEOUT_SECONDS,
            user_agent: constants::webhook::USER_AGENT.to_string(),
        }
    }
}

impl WebhookConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Synchronous dispatch path
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Bound on a single provider adapter call
    pub adapter_timeout_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_seconds: constants::dispatch::ADAPTER_TIMEOUT_SECONDS,
        }
    }
}

impl DispatchConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_seconds)
    }
}

/// Backend of the shared counter store
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

/// Shared counter store connection
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: Option<String>,
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: None,
            key_prefix: constants::keys::DEFAULT_PREFIX.to_string(),
        }
    }
}

impl GatewayConfig {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.health.failure_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "health.failure_threshold",
                0,
                "must be at least 1",
            ));
        }
        if self.health.success_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "health.success_threshold",
                0,
                "must be at least 1",
            ));
        }
        if self.health.timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "health.timeout_seconds",
                0,
                "open circuits need a cool-down",
            ));
        }
        if self.health.store_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "health.store_timeout_ms",
                0,
                "store operations must be bounded",
            ));
        }

        for channel in Channel::ALL {
            let mut seen = HashSet::new();
            for entry in self.providers.for_channel(channel) {
                if entry.id.trim().is_empty() {
                    return Err(ConfigurationError::invalid_provider(
                        channel.as_str(),
                        "provider id must not be empty",
                    ));
                }
                if !seen.insert(entry.id.as_str()) {
                    return Err(ConfigurationError::invalid_provider(
                        channel.as_str(),
                        format!("duplicate provider id {}", entry.id),
                    ));
                }
                if let Some(limit) = entry.rate_limit {
                    if limit.max_attempts == 0 || limit.window_seconds == 0 {
                        return Err(ConfigurationError::invalid_provider(
                            channel.as_str(),
                            format!("rate limit of {} needs non-zero attempts and window", entry.id),
                        ));
                    }
                }
            }
        }

        self.jobs.dispatch.validate("dispatch")?;
        self.jobs.failover.validate("failover")?;
        self.jobs.webhook.validate("webhook")?;
        self.jobs.status_update.validate("status_update")?;

        if self.workers.worker_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "workers.worker_count",
                0,
                "at least one worker is required",
            ));
        }
        if self.workers.queue_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "workers.queue_capacity",
                0,
                "queue capacity must be greater than zero",
            ));
        }

        if let Some(secret) = &self.webhook.secret {
            if secret.len() < constants::webhook::MIN_SECRET_LENGTH {
                return Err(ConfigurationError::invalid_value(
                    "webhook.secret",
                    "[MASKED]",
                    format!(
                        "secret must be at least {} bytes",
                        constants::webhook::MIN_SECRET_LENGTH
                    ),
                ));
            }
        }

        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_none() {
            return Err(ConfigurationError::missing_required_field(
                "redis_url",
                "store (backend = redis)",
            ));
        }

        Ok(())
    }
}

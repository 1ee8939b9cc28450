//! # Gateway Bootstrap
//!
//! Builds every component of the dispatch engine from one validated
//! [`GatewayConfig`] and wires them together explicitly: one shared counter
//! store behind the health monitor and the throttle guard, one message store,
//! one job queue and the [`JobContext`] handed to the worker pool.
//!
//! ```rust,no_run
//! use notify_gateway::bootstrap::GatewayBootstrap;
//! use notify_gateway::config::ConfigManager;
//! use notify_gateway::providers::ProviderRegistry;
//! use std::sync::Arc;
//!
//! # async fn example() -> notify_gateway::Result<()> {
//! let manager = ConfigManager::load()?;
//! let registry = Arc::new(ProviderRegistry::new());
//! // registry.register(Arc::new(MySmsAdapter::new(...)));
//!
//! let mut gateway = GatewayBootstrap::from_config(manager.config().clone(), registry).await?;
//! let pool = gateway.start_workers()?;
//! // ...
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tracing::info;

use crate::config::{ConfigurationError, GatewayConfig, StoreBackend};
use crate::error::{GatewayError, Result};
use crate::jobs::JobContext;
use crate::orchestration::DispatchOrchestrator;
use crate::providers::{ProviderRegistry, ProviderSelector};
use crate::queue::{JobQueue, JobReceivers, WorkerPool};
use crate::resilience::{HealthMonitor, RateLimiter, ThrottleGuard};
use crate::store::{CounterStore, InMemoryCounterStore, InMemoryMessageStore, MessageStore};
use crate::utils::{SharedClock, SystemClock};
use crate::webhook::{HttpWebhookTransport, WebhookSender, WebhookTransport};

/// Externally supplied collaborators
#[derive(Clone)]
pub struct GatewayParts {
    pub counter_store: Arc<dyn CounterStore>,
    pub message_store: Arc<dyn MessageStore>,
    pub registry: Arc<ProviderRegistry>,
    pub webhook_transport: Arc<dyn WebhookTransport>,
    pub clock: SharedClock,
}

impl std::fmt::Debug for GatewayParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayParts")
            .field("registry", &self.registry.ids())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// A fully wired dispatch engine
#[derive(Debug)]
pub struct GatewayBootstrap {
    config: Arc<GatewayConfig>,
    health: HealthMonitor,
    context: JobContext,
    receivers: Option<JobReceivers>,
}

impl GatewayBootstrap {
    /// Build with the configured counter store backend, an in-memory message
    /// store, the HTTP webhook transport and the system clock
    pub async fn from_config(config: GatewayConfig, registry: Arc<ProviderRegistry>) -> Result<Self> {
        config.validate()?;
        let clock = SystemClock::shared();
        let counter_store = counter_store_for(&config, clock.clone()).await?;
        let parts = GatewayParts {
            counter_store,
            message_store: Arc::new(InMemoryMessageStore::with_clock(clock.clone())),
            registry,
            webhook_transport: Arc::new(HttpWebhookTransport::new(&config.webhook)?),
            clock,
        };
        Self::from_parts(config, parts)
    }

    /// Build around caller-supplied stores, transport and clock
    pub fn from_parts(config: GatewayConfig, parts: GatewayParts) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let health = HealthMonitor::new(
            parts.counter_store.clone(),
            config.health.clone(),
            config.store.key_prefix.clone(),
            parts.clock.clone(),
        );
        let rate_limiter: Arc<dyn RateLimiter> = Arc::new(ThrottleGuard::new(
            parts.counter_store.clone(),
            config.store.key_prefix.clone(),
            config.health.store_timeout(),
        ));
        let selector = ProviderSelector::new(config.providers.clone(), health.clone());

        let (queue, receivers) = JobQueue::new(config.workers.queue_capacity);
        let orchestrator = Arc::new(DispatchOrchestrator::new(
            selector,
            parts.registry.clone(),
            parts.message_store.clone(),
            config.dispatch.clone(),
            parts.clock.clone(),
            queue.clone(),
        ));
        let webhooks = WebhookSender::new(
            parts.webhook_transport.clone(),
            &config.webhook,
            parts.clock.clone(),
        );

        let context = JobContext {
            orchestrator,
            store: parts.message_store,
            rate_limiter,
            webhooks,
            config: config.clone(),
            clock: parts.clock,
            queue,
        };

        info!(
            store_backend = ?config.store.backend,
            providers = parts.registry.ids().len(),
            "✅ Notification gateway bootstrapped"
        );

        Ok(Self {
            config,
            health,
            context,
            receivers: Some(receivers),
        })
    }

    pub fn config(&self) -> &Arc<GatewayConfig> {
        &self.config
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn orchestrator(&self) -> Arc<DispatchOrchestrator> {
        self.context.orchestrator.clone()
    }

    pub fn context(&self) -> &JobContext {
        &self.context
    }

    /// The queue's receiving side; `None` once workers own it
    pub fn take_receivers(&mut self) -> Option<JobReceivers> {
        self.receivers.take()
    }

    /// Start the configured number of workers
    pub fn start_workers(&mut self) -> Result<WorkerPool> {
        let receivers = self.take_receivers().ok_or_else(|| {
            GatewayError::Configuration(ConfigurationError::invalid_value(
                "workers",
                "started",
                "the worker pool is already running",
            ))
        })?;
        Ok(WorkerPool::start(
            self.context.clone(),
            receivers,
            &self.config.workers,
        ))
    }
}

async fn counter_store_for(
    config: &GatewayConfig,
    clock: SharedClock,
) -> Result<Arc<dyn CounterStore>> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryCounterStore::with_clock(clock))),
        StoreBackend::Redis => redis_store(config).await,
    }
}

#[cfg(feature = "redis")]
async fn redis_store(config: &GatewayConfig) -> Result<Arc<dyn CounterStore>> {
    let url = config.store.redis_url.as_deref().ok_or_else(|| {
        GatewayError::Configuration(ConfigurationError::missing_required_field(
            "redis_url",
            "store",
        ))
    })?;
    let store = crate::store::RedisCounterStore::connect(url).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn redis_store(_config: &GatewayConfig) -> Result<Arc<dyn CounterStore>> {
    Err(GatewayError::Configuration(ConfigurationError::invalid_value(
        "store.backend",
        "redis",
        "built without the `redis` feature",
    )))
}

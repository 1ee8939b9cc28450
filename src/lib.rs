#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, WhatsApp in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Notification Gateway Core
//!
//! Dispatch and failover engine of a multi-channel (SMS, email, WhatsApp)
//! notification gateway.
//!
//! ## Overview
//!
//! A send request is persisted, routed to one of several competing upstream
//! providers and either delivered or failed in a well-defined way. The engine
//! protects itself and the providers with a per-provider circuit breaker and
//! a per `(provider, channel)` throttle, and reports progress to the client
//! through signed, retried webhooks.
//!
//! ## Module Organization
//!
//! - [`resilience`] - Health monitor (circuit breaker, health score) and throttle guard
//! - [`providers`] - Provider adapter contract, registry and selector
//! - [`orchestration`] - Dispatch orchestrator and error classification
//! - [`jobs`] - Dispatch, failover dispatch, status update and webhook jobs
//! - [`queue`] - Priority-partitioned job queue and worker pool
//! - [`webhook`] - Payload building, HMAC signing and HTTP transport
//! - [`store`] - Shared counter store and message store contracts
//! - [`state_machine`] - Message status transition table
//! - [`config`] - Configuration loading and validation
//! - [`bootstrap`] - Wires every component from one configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use notify_gateway::bootstrap::GatewayBootstrap;
//! use notify_gateway::config::GatewayConfig;
//! use notify_gateway::models::SendRequest;
//! use notify_gateway::providers::ProviderRegistry;
//! use std::sync::Arc;
//!
//! # async fn example() -> notify_gateway::Result<()> {
//! let registry = Arc::new(ProviderRegistry::new());
//! let gateway = GatewayBootstrap::from_config(GatewayConfig::default(), registry).await?;
//!
//! let receipt = gateway
//!     .orchestrator()
//!     .send(SendRequest::new("sms", "+255712345678", "Your code is 4821"))
//!     .await?;
//! println!("{} is {}", receipt.message_id, receipt.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod providers;
pub mod queue;
pub mod resilience;
pub mod state_machine;
pub mod store;
pub mod utils;
pub mod webhook;

// In-memory gateway wiring (test builds or the `test-helpers` feature)
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use bootstrap::{GatewayBootstrap, GatewayParts};
pub use config::{ConfigManager, ConfigurationError, GatewayConfig};
pub use error::{GatewayError, Result};
pub use jobs::{
    DispatchJob, FailoverDispatchJob, Job, JobContext, JobOutcome, JobPolicy, StatusUpdateJob,
    WebhookDeliveryJob,
};
pub use models::{Channel, Message, MessageUpdate, SendRequest, WebhookEvent};
pub use orchestration::{DispatchOrchestrator, DispatchReceipt, ErrorKind};
pub use providers::{ProviderAdapter, ProviderRegistry, ProviderSelector};
pub use queue::{JobQueue, WorkerPool};
pub use resilience::{HealthMonitor, RateLimiter, ThrottleGuard};
pub use state_machine::{DeliveryEvent, MessageStatus};
pub use store::{CounterStore, MessageStore, StoreError};
pub use utils::{Clock, ManualClock, SystemClock};

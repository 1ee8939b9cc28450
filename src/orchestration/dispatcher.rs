//! # Dispatch Orchestrator
//!
//! Synchronous "send now" path and the single-provider attempt used by the
//! job pipeline.
//!
//! `send` validates, persists the message as `queued`, picks a provider
//! (pinned or selected), moves the message to `sending` and calls
//! [`DispatchOrchestrator::deliver`]. `deliver` invokes the adapter under the
//! configured timeout, records the outcome in the health monitor and either
//! moves the message to `sent` or returns `ProviderFailed` for the caller to
//! retry or fail over.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::error::{GatewayError, Result};
use crate::jobs::{DispatchJob, FailoverDispatchJob, Job};
use crate::logging::{log_dispatch_operation, log_provider_operation};
use crate::models::{Channel, Message, MessageUpdate, SendRequest};
use crate::orchestration::error_classifier::ErrorKind;
use crate::providers::{ProviderFailure, ProviderRegistry, ProviderRequest, ProviderSelector};
use crate::queue::JobQueue;
use crate::resilience::HealthMonitor;
use crate::state_machine::MessageStatus;
use crate::store::MessageStore;
use crate::utils::SharedClock;

/// What the caller of `send` gets back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub message_id: Uuid,
    pub status: MessageStatus,
    pub provider: Option<String>,
    pub external_id: Option<String>,
}

impl From<&Message> for DispatchReceipt {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id,
            status: message.status,
            provider: message.provider.clone(),
            external_id: message.external_id.clone(),
        }
    }
}

pub struct DispatchOrchestrator {
    selector: ProviderSelector,
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn MessageStore>,
    config: DispatchConfig,
    clock: SharedClock,
    queue: JobQueue,
}

impl std::fmt::Debug for DispatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchOrchestrator")
            .field("config", &self.config)
            .field("providers", &self.registry.ids())
            .finish_non_exhaustive()
    }
}

impl DispatchOrchestrator {
    pub fn new(
        selector: ProviderSelector,
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn MessageStore>,
        config: DispatchConfig,
        clock: SharedClock,
        queue: JobQueue,
    ) -> Self {
        info!(
            adapter_timeout_seconds = config.adapter_timeout_seconds,
            providers = registry.ids().len(),
            "🚀 Dispatch orchestrator initialized"
        );
        Self {
            selector,
            registry,
            store,
            config,
            clock,
            queue,
        }
    }

    pub fn selector(&self) -> &ProviderSelector {
        &self.selector
    }

    pub fn health(&self) -> &HealthMonitor {
        self.selector.health()
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Reject a pinned provider that is not enabled for the channel before
    /// anything is persisted
    fn check_pin(&self, channel: Channel, pinned: Option<&str>) -> Result<()> {
        match pinned {
            Some(provider) => match self.selector.providers().entry(channel, provider) {
                Some(entry) if entry.enabled => Ok(()),
                _ => Err(GatewayError::Validation(format!(
                    "provider {provider} is not enabled for channel {channel}"
                ))),
            },
            None => Ok(()),
        }
    }

    /// Send immediately on the caller's task. A failure marks the message
    /// `failed`; nothing retries it.
    pub async fn send(&self, request: SendRequest) -> Result<DispatchReceipt> {
        let new = request.validate()?;
        let channel = new.channel;
        self.check_pin(channel, request.provider.as_deref())?;

        let message = self.store.create(new, MessageStatus::Queued).await?;
        let message_id = message.id.to_string();
        log_dispatch_operation(
            "send",
            Some(&message_id),
            Some(channel.as_str()),
            None,
            "queued",
            None,
        );

        let result = self.send_persisted(&message, request.provider.as_deref()).await;
        match result {
            Ok(sent) => Ok(DispatchReceipt::from(&sent)),
            Err(e) => {
                self.fail_message(message.id, &e).await;
                Err(e)
            }
        }
    }

    async fn send_persisted(&self, message: &Message, pinned: Option<&str>) -> Result<Message> {
        let provider = match pinned {
            Some(provider) => self.selector.select_pinned(message.channel, provider).await?,
            None => self.selector.select(message.channel).await?,
        };
        let sending = self
            .store
            .transition(
                message.id,
                MessageStatus::Sending,
                MessageUpdate::new().retry_count(1),
            )
            .await?;
        self.deliver(&sending, &provider).await
    }

    async fn fail_message(&self, id: Uuid, error: &GatewayError) {
        let update = MessageUpdate::new()
            .error_message(error.to_string())
            .retry_count(1)
            .failed_at(self.clock.now());
        if let Err(e) = self.store.transition(id, MessageStatus::Failed, update).await {
            warn!(message_id = %id, error = %e, "⚠️ Could not mark message failed");
        }
    }

    /// One attempt through `provider`. On success the message is `sent`; on
    /// failure the error is stored on the message and `ProviderFailed` is
    /// returned.
    pub async fn deliver(&self, message: &Message, provider: &str) -> Result<Message> {
        let adapter = self.registry.get(provider)?;
        let request = ProviderRequest::from(message);
        let channel = message.channel.as_str();
        let timeout = self.config.adapter_timeout();

        debug!(
            message_id = %message.id,
            provider = %provider,
            channel = %channel,
            "📤 Invoking provider adapter"
        );
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, adapter.send(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderFailure::new(
                format!("Provider {provider} timed out after {}s", timeout.as_secs()),
                started.elapsed().as_millis() as u64,
            )
            .with_kind(ErrorKind::Network)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(receipt) => {
                let response_time_ms = if receipt.response_time_ms > 0 {
                    receipt.response_time_ms
                } else {
                    elapsed_ms
                };
                self.health().record_success(provider, response_time_ms).await;
                log_provider_operation(
                    "send",
                    provider,
                    Some(channel),
                    "success",
                    Some(response_time_ms),
                    None,
                );

                let update = MessageUpdate::new()
                    .provider(provider)
                    .external_id(receipt.provider_message_id)
                    .cost(receipt.cost)
                    .sent_at(self.clock.now());
                let sent = self
                    .store
                    .transition(message.id, MessageStatus::Sent, update)
                    .await?;
                log_dispatch_operation(
                    "deliver",
                    Some(&sent.id.to_string()),
                    Some(channel),
                    Some(provider),
                    "sent",
                    sent.external_id.as_deref(),
                );
                Ok(sent)
            }
            Err(failure) => {
                self.health().record_failure(provider, &failure.message).await;
                log_provider_operation(
                    "send",
                    provider,
                    Some(channel),
                    "failed",
                    Some(elapsed_ms),
                    Some(&failure.message),
                );
                warn!(
                    message_id = %message.id,
                    provider = %provider,
                    error_kind = %failure.kind,
                    error = %failure.message,
                    "⚠️ Provider send failed"
                );

                let update = MessageUpdate::new()
                    .provider(provider)
                    .error_message(failure.message.clone());
                if let Err(e) = self.store.update(message.id, update).await {
                    warn!(message_id = %message.id, error = %e, "⚠️ Could not record provider error");
                }

                Err(GatewayError::ProviderFailed {
                    provider: provider.to_string(),
                    kind: failure.kind,
                    message: failure.message,
                })
            }
        }
    }

    /// Persist the message as `queued` and hand it to the job pipeline
    pub async fn queue(&self, request: SendRequest) -> Result<Uuid> {
        let new = request.validate()?;
        let channel = new.channel;
        self.check_pin(channel, request.provider.as_deref())?;

        let message = self.store.create(new, MessageStatus::Queued).await?;
        let job: Box<dyn Job> = if request.failover {
            Box::new(FailoverDispatchJob::new(message.id, request.provider.clone()))
        } else {
            Box::new(DispatchJob::new(message.id, request.provider.clone()))
        };
        let job_name = job.name();

        if !self.queue.push_nowait(job, request.priority) {
            self.fail_message(message.id, &GatewayError::QueueClosed).await;
            return Err(GatewayError::QueueClosed);
        }

        log_dispatch_operation(
            "queue",
            Some(&message.id.to_string()),
            Some(channel.as_str()),
            request.provider.as_deref(),
            "queued",
            Some(job_name),
        );
        Ok(message.id)
    }

    /// Cooperative cancellation; only `pending` and `queued` messages can be
    /// cancelled
    pub async fn cancel(&self, message_id: Uuid) -> Result<Message> {
        let cancelled = self
            .store
            .transition(
                message_id,
                MessageStatus::Cancelled,
                MessageUpdate::new().cancelled_at(self.clock.now()),
            )
            .await?;
        log_dispatch_operation(
            "cancel",
            Some(&message_id.to_string()),
            Some(cancelled.channel.as_str()),
            cancelled.provider.as_deref(),
            "cancelled",
            None,
        );
        Ok(cancelled)
    }

    pub async fn find(&self, message_id: Uuid) -> Result<Option<Message>> {
        self.store.find(message_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CircuitState;
    use crate::test_helpers::{sms_providers, ScriptedAdapter, TestGateway};

    #[tokio::test]
    async fn test_send_selects_highest_priority() {
        let gateway = TestGateway::new(sms_providers(&[("beem", 90), ("termii", 60)]));
        let beem = gateway.register(ScriptedAdapter::succeeding("beem"));
        gateway.register(ScriptedAdapter::succeeding("termii"));

        let receipt = gateway
            .orchestrator
            .send(SendRequest::new("sms", "+255712345678", "hello"))
            .await
            .unwrap();

        assert_eq!(receipt.status, MessageStatus::Sent);
        assert_eq!(receipt.provider.as_deref(), Some("beem"));
        assert_eq!(receipt.external_id.as_deref(), Some("beem-1"));
        assert_eq!(beem.calls(), 1);

        let stored = gateway.message(receipt.message_id).await;
        assert!(stored.sent_at.is_some());
        assert_eq!(stored.retry_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_channel_is_rejected_before_persisting() {
        let gateway = TestGateway::new(sms_providers(&[("beem", 90)]));
        let err = gateway
            .orchestrator
            .send(SendRequest::new("fax", "+255712345678", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidChannel(_)));
        assert!(!err.is_retryable());
        assert!(gateway.messages.is_empty());
    }

    #[tokio::test]
    async fn test_pinned_provider_is_used() {
        let gateway = TestGateway::new(sms_providers(&[("beem", 90), ("termii", 60)]));
        gateway.register(ScriptedAdapter::succeeding("beem"));
        let termii = gateway.register(ScriptedAdapter::succeeding("termii"));

        let receipt = gateway
            .orchestrator
            .send(SendRequest::new("sms", "+255712345678", "hello").with_provider("termii"))
            .await
            .unwrap();
        assert_eq!(receipt.provider.as_deref(), Some("termii"));
        assert_eq!(termii.calls(), 1);
    }

    #[tokio::test]
    async fn test_adapter_failure_records_health_and_fails_message() {
        let gateway = TestGateway::new(sms_providers(&[("beem", 90)]));
        gateway.register(ScriptedAdapter::failing("beem", "connection reset by peer"));

        let err = gateway
            .orchestrator
            .send(SendRequest::new("sms", "+255712345678", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            GatewayError::ProviderFailed { provider, kind: ErrorKind::Network, .. } if provider == "beem"
        ));

        let record = gateway.health.record("beem").await;
        assert_eq!(record.failure_count, 1);
        assert_eq!(record.total_requests, 1);

        let messages = gateway.messages.all();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, MessageStatus::Failed);
        assert!(messages[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_success_stores_cost_and_updates_health() {
        let gateway = TestGateway::new(sms_providers(&[("beem", 90)]));
        gateway.register(ScriptedAdapter::succeeding("beem").with_cost(0.03));

        let receipt = gateway
            .orchestrator
            .send(SendRequest::new("sms", "+255712345678", "hello"))
            .await
            .unwrap();

        let stored = gateway.message(receipt.message_id).await;
        assert_eq!(stored.cost, Some(0.03));
        let record = gateway.health.record("beem").await;
        assert_eq!(record.successful_requests, 1);
        assert_eq!(record.circuit_state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancel_only_before_dispatch() {
        let gateway = TestGateway::new(sms_providers(&[("beem", 90)]));
        gateway.register(ScriptedAdapter::succeeding("beem"));

        let queued = gateway
            .orchestrator
            .queue(SendRequest::new("sms", "+255712345678", "later"))
            .await
            .unwrap();
        let cancelled = gateway.orchestrator.cancel(queued).await.unwrap();
        assert_eq!(cancelled.status, MessageStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());

        let sent = gateway
            .orchestrator
            .send(SendRequest::new("sms", "+255712345678", "now"))
            .await
            .unwrap();
        assert!(matches!(
            gateway.orchestrator.cancel(sent.message_id).await,
            Err(GatewayError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_adapter_timeout_is_a_network_failure() {
        let mut config = TestGateway::config(sms_providers(&[("beem", 90)]));
        config.dispatch.adapter_timeout_seconds = 1;
        let gateway = TestGateway::with_config(config);
        gateway.register(
            ScriptedAdapter::succeeding("beem").with_delay(std::time::Duration::from_secs(5)),
        );

        tokio::time::pause();
        let err = gateway
            .orchestrator
            .send(SendRequest::new("sms", "+255712345678", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::ProviderFailed { kind: ErrorKind::Network, .. }
        ));
    }
}

//! # Job Pipeline
//!
//! Queue jobs that execute sends, apply provider delivery callbacks and post
//! client webhooks. Each job type declares its own [`JobPolicy`] (timeout,
//! tries, backoff schedule); the worker in [`crate::queue::worker`] owns the
//! retry loop and calls [`Job::on_final_failure`] exactly once when a job
//! gives up.
//!
//! Jobs receive their collaborators through [`JobContext`] rather than
//! looking them up globally.

pub mod dispatch;
pub mod failover;
pub mod status_update;
pub mod webhook_delivery;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::models::{Message, MessageUpdate, QueuePriority, WebhookEvent};
use crate::orchestration::DispatchOrchestrator;
use crate::queue::JobQueue;
use crate::resilience::RateLimiter;
use crate::state_machine::MessageStatus;
use crate::store::MessageStore;
use crate::utils::SharedClock;
use crate::webhook::{failed_data, WebhookSender};

pub use dispatch::DispatchJob;
pub use failover::FailoverDispatchJob;
pub use status_update::{StatusTarget, StatusUpdateJob};
pub use webhook_delivery::WebhookDeliveryJob;

/// Timeout, tries and backoff of a job type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPolicy {
    pub timeout: Duration,
    pub max_tries: u32,
    pub backoff: Vec<Duration>,
}

impl JobPolicy {
    /// Delay after the `attempt`-th failed try; the last entry repeats
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let index = (attempt.max(1) as usize - 1).min(self.backoff.len().saturating_sub(1));
        self.backoff.get(index).copied().unwrap_or_default()
    }

    pub fn has_tries_left(&self, attempt: u32) -> bool {
        attempt < self.max_tries
    }
}

/// Result of one successful `handle` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Put the job back after the delay without consuming a try
    Release(Duration),
    /// Nothing left to do; the reason is logged
    Discard(String),
}

/// A unit of queued work
#[async_trait]
pub trait Job: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn policy(&self, ctx: &JobContext) -> JobPolicy;

    /// Run one try; `attempt` is 1-based
    async fn handle(&mut self, ctx: &JobContext, attempt: u32) -> Result<JobOutcome>;

    /// Whether a failed try may be retried
    fn should_retry(&self, error: &GatewayError) -> bool {
        error.is_retryable()
    }

    /// Called after every failed try
    async fn on_failure(&mut self, _ctx: &JobContext, attempt: u32, error: &GatewayError) {
        debug!(job = self.name(), attempt = attempt, error = %error, "Job try failed");
    }

    /// Called once when the job gives up
    async fn on_final_failure(&mut self, _ctx: &JobContext, _attempts: u32, _error: &GatewayError) {
    }
}

/// Collaborators shared by every job
#[derive(Clone)]
pub struct JobContext {
    pub orchestrator: Arc<DispatchOrchestrator>,
    pub store: Arc<dyn MessageStore>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub webhooks: WebhookSender,
    pub config: Arc<GatewayConfig>,
    pub clock: SharedClock,
    pub queue: JobQueue,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("orchestrator", &self.orchestrator)
            .field("webhooks", &self.webhooks)
            .finish_non_exhaustive()
    }
}

impl JobContext {
    /// Load a message or fail with `MessageNotFound`
    pub async fn load_message(&self, id: Uuid) -> Result<Message> {
        self.store
            .find(id)
            .await?
            .ok_or(GatewayError::MessageNotFound(id))
    }

    /// Enqueue a webhook for `message` when it has a callback URL
    pub async fn notify_webhook(&self, message: &Message, event: WebhookEvent, data: Value) {
        if !message.has_webhook() {
            return;
        }
        let job = WebhookDeliveryJob::new(message.id, event, data);
        if !self.queue.push_nowait(Box::new(job), QueuePriority::Default) {
            warn!(
                message_id = %message.id,
                event = %event,
                "⚠️ Could not enqueue webhook - queue closed"
            );
        }
    }

    /// Move a message to `failed` after a dispatch gave up and emit the
    /// `failed` webhook once
    pub async fn mark_failed(&self, message_id: Uuid, attempts: u32, error: &GatewayError) {
        let reason = error.to_string();
        let update = MessageUpdate::new()
            .error_message(reason.clone())
            .retry_count(attempts)
            .failed_at(self.clock.now());

        match self
            .store
            .transition(message_id, MessageStatus::Failed, update)
            .await
        {
            Ok(message) => {
                warn!(
                    message_id = %message_id,
                    attempts = attempts,
                    error_kind = %error.kind(),
                    error = %reason,
                    "❌ Message failed permanently"
                );
                let data = failed_data(&reason, message.retry_count);
                self.notify_webhook(&message, WebhookEvent::Failed, data).await;
            }
            Err(e) => {
                warn!(
                    message_id = %message_id,
                    error = %e,
                    "⚠️ Could not mark message failed"
                );
            }
        }
    }
}

/// Move a message into `sending` for try `attempt`; `None` when the message
/// can no longer be dispatched
pub(crate) async fn begin_sending(
    ctx: &JobContext,
    message: Message,
    attempt: u32,
) -> Result<Option<Message>> {
    if !message.status.is_dispatchable() {
        return Ok(None);
    }
    let update = MessageUpdate::new().retry_count(attempt);
    let result = if message.status == MessageStatus::Sending {
        ctx.store.update(message.id, update).await
    } else {
        ctx.store
            .transition(message.id, MessageStatus::Sending, update)
            .await
    };
    match result {
        Ok(message) => Ok(Some(message)),
        Err(GatewayError::InvalidTransition { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

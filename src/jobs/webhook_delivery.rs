//! Posts one client webhook event, retried on the webhook backoff schedule.
//!
//! Webhook outcomes are stamped on the message (`webhook_delivered`,
//! `webhook_attempts`, `webhook_error`, `webhook_failed_at`) but never touch
//! its delivery status.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use super::{Job, JobContext, JobOutcome, JobPolicy};
use crate::error::{GatewayError, Result};
use crate::logging::log_error;
use crate::models::{MessageUpdate, WebhookEvent};

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookDeliveryJob {
    pub message_id: Uuid,
    pub event: WebhookEvent,
    pub data: Value,
}

impl WebhookDeliveryJob {
    pub fn new(message_id: Uuid, event: WebhookEvent, data: Value) -> Self {
        Self {
            message_id,
            event,
            data,
        }
    }
}

#[async_trait]
impl Job for WebhookDeliveryJob {
    fn name(&self) -> &'static str {
        "webhook_delivery"
    }

    fn policy(&self, ctx: &JobContext) -> JobPolicy {
        ctx.config.jobs.webhook.to_policy()
    }

    async fn handle(&mut self, ctx: &JobContext, attempt: u32) -> Result<JobOutcome> {
        let message = ctx.load_message(self.message_id).await?;
        if !message.has_webhook() {
            return Ok(JobOutcome::Discard("message has no webhook_url".to_string()));
        }

        let outcome = ctx
            .webhooks
            .deliver(&message, self.event, &self.data, attempt)
            .await?;

        if outcome.delivered {
            ctx.store
                .update(message.id, MessageUpdate::new().webhook_delivered(attempt))
                .await?;
            return Ok(JobOutcome::Completed);
        }

        let reason = outcome
            .error
            .unwrap_or_else(|| "Webhook delivery failed".to_string());
        if let Err(e) = ctx
            .store
            .update(
                message.id,
                MessageUpdate::new().webhook_attempt_failed(attempt, reason.clone()),
            )
            .await
        {
            warn!(message_id = %message.id, error = %e, "⚠️ Could not record webhook attempt");
        }
        Err(GatewayError::Webhook(reason))
    }

    async fn on_final_failure(&mut self, ctx: &JobContext, attempts: u32, error: &GatewayError) {
        error!(
            message_id = %self.message_id,
            event = %self.event,
            attempts = attempts,
            error = %error,
            "❌ Webhook delivery abandoned"
        );
        log_error(
            "webhook_delivery",
            self.event.as_str(),
            &error.to_string(),
            Some(&self.message_id.to_string()),
        );

        let update = MessageUpdate::new().webhook_failed(error.to_string(), ctx.clock.now());
        if let Err(e) = ctx.store.update(self.message_id, update).await {
            warn!(message_id = %self.message_id, error = %e, "⚠️ Could not stamp webhook failure");
        }
    }
}

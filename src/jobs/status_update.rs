//! Applies delivery events reported by providers (delivery receipts,
//! bounces) to messages.
//!
//! The transition table is checked before mutating. An event that would
//! break it is logged and dropped, never retried. A callback that arrives
//! before its message can be found is retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Job, JobContext, JobOutcome, JobPolicy};
use crate::error::{GatewayError, Result};
use crate::models::{Message, MessageUpdate, WebhookEvent};
use crate::state_machine::{DeliveryEvent, MessageStatus};
use crate::webhook::{delivered_data, failed_data};

/// How the reported message is identified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTarget {
    Message(Uuid),
    External {
        provider: String,
        external_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdateJob {
    pub target: StatusTarget,
    pub event: DeliveryEvent,
    /// Provider-supplied reason for failure events
    pub error: Option<String>,
    /// When the provider observed the event
    pub occurred_at: Option<DateTime<Utc>>,
}

impl StatusUpdateJob {
    pub fn new(target: StatusTarget, event: DeliveryEvent) -> Self {
        Self {
            target,
            event,
            error: None,
            occurred_at: None,
        }
    }

    pub fn for_external_id(
        provider: impl Into<String>,
        external_id: impl Into<String>,
        event: DeliveryEvent,
    ) -> Self {
        Self::new(
            StatusTarget::External {
                provider: provider.into(),
                external_id: external_id.into(),
            },
            event,
        )
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    async fn resolve(&self, ctx: &JobContext) -> Result<Message> {
        match &self.target {
            StatusTarget::Message(id) => ctx.load_message(*id).await,
            StatusTarget::External {
                provider,
                external_id,
            } => ctx
                .store
                .find_by_external_id(provider, external_id)
                .await?
                .ok_or_else(|| GatewayError::ExternalIdNotFound {
                    provider: provider.clone(),
                    external_id: external_id.clone(),
                }),
        }
    }

    fn failure_reason(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| format!("Provider reported {}", self.event.event_type()))
    }

    fn update_for(&self, target: MessageStatus, message: &Message, at: DateTime<Utc>) -> MessageUpdate {
        let update = MessageUpdate::new();
        match target {
            MessageStatus::Delivered => update.delivered_at(at),
            MessageStatus::Failed => update.failed_at(at).error_message(self.failure_reason()),
            MessageStatus::Sent if message.sent_at.is_none() => update.sent_at(at),
            MessageStatus::Cancelled => update.cancelled_at(at),
            _ => update,
        }
    }
}

#[async_trait]
impl Job for StatusUpdateJob {
    fn name(&self) -> &'static str {
        "status_update"
    }

    fn policy(&self, ctx: &JobContext) -> JobPolicy {
        ctx.config.jobs.status_update.to_policy()
    }

    async fn handle(&mut self, ctx: &JobContext, _attempt: u32) -> Result<JobOutcome> {
        let message = self.resolve(ctx).await?;
        let target = self.event.target_status();

        if message.status == target {
            debug!(
                message_id = %message.id,
                event = self.event.event_type(),
                "Duplicate delivery event ignored"
            );
            return Ok(JobOutcome::Discard(format!("message already {target}")));
        }
        if !message.status.can_transition_to(target) {
            warn!(
                message_id = %message.id,
                from = %message.status,
                to = %target,
                event = self.event.event_type(),
                "⚠️ Dropping delivery event with invalid transition"
            );
            return Ok(JobOutcome::Discard(format!(
                "invalid transition {} -> {target}",
                message.status
            )));
        }

        let at = self.occurred_at.unwrap_or_else(|| ctx.clock.now());
        let update = self.update_for(target, &message, at);
        let updated = match ctx.store.transition(message.id, target, update).await {
            Ok(updated) => updated,
            Err(GatewayError::InvalidTransition { from, to }) => {
                warn!(
                    message_id = %message.id,
                    from = %from,
                    to = %to,
                    "⚠️ Delivery event lost a race - dropping"
                );
                return Ok(JobOutcome::Discard(format!("invalid transition {from} -> {to}")));
            }
            Err(e) => return Err(e),
        };

        info!(
            message_id = %updated.id,
            status = %updated.status,
            event = self.event.event_type(),
            "📬 Delivery status applied"
        );

        match target {
            MessageStatus::Delivered => {
                let data = delivered_data(&updated);
                ctx.notify_webhook(&updated, WebhookEvent::Delivered, data).await;
            }
            MessageStatus::Failed => {
                let data = failed_data(&self.failure_reason(), updated.retry_count);
                ctx.notify_webhook(&updated, WebhookEvent::Failed, data).await;
            }
            _ => {}
        }
        Ok(JobOutcome::Completed)
    }

    fn should_retry(&self, error: &GatewayError) -> bool {
        matches!(
            error,
            GatewayError::MessageNotFound(_) | GatewayError::ExternalIdNotFound { .. }
        ) || error.is_retryable()
    }
}

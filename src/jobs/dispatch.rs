//! Single-provider dispatch job.
//!
//! Each try selects one provider (or uses the pinned one), consults the
//! throttle guard, moves the message to `sending` and hands it to the
//! orchestrator. A failed try is retried by the queue after the backoff
//! delay; when tries run out the message is marked `failed`.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use super::{begin_sending, Job, JobContext, JobOutcome, JobPolicy};
use crate::error::{GatewayError, Result};
use crate::models::{Message, WebhookEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchJob {
    pub message_id: Uuid,
    /// Provider requested by the caller
    pub provider: Option<String>,
}

impl DispatchJob {
    pub fn new(message_id: Uuid, provider: Option<String>) -> Self {
        Self {
            message_id,
            provider,
        }
    }

    async fn choose_provider(&self, ctx: &JobContext, message: &Message) -> Result<String> {
        let selector = ctx.orchestrator.selector();
        match &self.provider {
            Some(pinned) => selector.select_pinned(message.channel, pinned).await,
            None => selector.select(message.channel).await,
        }
    }
}

#[async_trait]
impl Job for DispatchJob {
    fn name(&self) -> &'static str {
        "dispatch"
    }

    fn policy(&self, ctx: &JobContext) -> JobPolicy {
        ctx.config.jobs.dispatch.to_policy()
    }

    async fn handle(&mut self, ctx: &JobContext, attempt: u32) -> Result<JobOutcome> {
        let message = ctx.load_message(self.message_id).await?;
        if !message.status.is_dispatchable() {
            return Ok(JobOutcome::Discard(format!(
                "message is {}",
                message.status
            )));
        }

        let provider = self.choose_provider(ctx, &message).await?;

        if let Some(limit) = ctx
            .config
            .providers
            .entry(message.channel, &provider)
            .and_then(|entry| entry.rate_limit)
        {
            if ctx
                .rate_limiter
                .should_throttle(&provider, message.channel, &limit)
                .await
            {
                let delay = ctx
                    .rate_limiter
                    .release_delay(&provider, message.channel, &limit)
                    .await;
                debug!(
                    message_id = %message.id,
                    provider = %provider,
                    delay_seconds = delay.as_secs(),
                    "⏳ Dispatch throttled - releasing"
                );
                return Ok(JobOutcome::Release(delay));
            }
            ctx.rate_limiter
                .hit(&provider, message.channel, &limit)
                .await;
        }

        let Some(message) = begin_sending(ctx, message, attempt).await? else {
            return Ok(JobOutcome::Discard(
                "message can no longer be dispatched".to_string(),
            ));
        };

        let sent = ctx.orchestrator.deliver(&message, &provider).await?;
        info!(
            message_id = %sent.id,
            provider = %provider,
            attempt = attempt,
            "✅ Message dispatched"
        );

        let data = json!({
            "provider": provider,
            "external_id": sent.external_id,
            "attempt": attempt,
        });
        ctx.notify_webhook(&sent, WebhookEvent::Sent, data).await;
        Ok(JobOutcome::Completed)
    }

    async fn on_final_failure(&mut self, ctx: &JobContext, attempts: u32, error: &GatewayError) {
        ctx.mark_failed(self.message_id, attempts, error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobDisposition, QueuedJob};
    use crate::models::{QueuePriority, SendRequest};
    use crate::state_machine::MessageStatus;
    use crate::test_helpers::{sms_providers, ScriptedAdapter, TestGateway};
    use std::time::Duration;

    async fn queued_message(gateway: &TestGateway, request: SendRequest) -> Uuid {
        let id = gateway.orchestrator.queue(request).await.unwrap();
        // Drop the job `queue` pushed; tests drive their own copy
        gateway.next_job();
        id
    }

    #[tokio::test]
    async fn test_dispatch_sends_and_notifies() {
        let gateway = TestGateway::new(sms_providers(&[("beem", 90)]));
        gateway.register(ScriptedAdapter::succeeding("beem"));
        let id = queued_message(
            &gateway,
            SendRequest::new("sms", "+255712345678", "hi").with_webhook_url("https://client.test/hook"),
        )
        .await;

        let job = QueuedJob::new(Box::new(DispatchJob::new(id, None)), QueuePriority::Default);
        assert!(matches!(gateway.run_job(job).await, JobDisposition::Completed));

        let message = gateway.message(id).await;
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.retry_count, 1);

        let webhook = gateway.next_job().expect("sent webhook enqueued");
        assert_eq!(webhook.job.name(), "webhook_delivery");
    }

    #[tokio::test]
    async fn test_failed_try_is_retried_with_backoff() {
        let gateway = TestGateway::new(sms_providers(&[("beem", 90)]));
        gateway.register(ScriptedAdapter::failing("beem", "connection timed out"));
        let id = queued_message(&gateway, SendRequest::new("sms", "+255712345678", "hi")).await;

        let job = QueuedJob::new(Box::new(DispatchJob::new(id, None)), QueuePriority::Default);
        match gateway.run_job(job).await {
            JobDisposition::Retry { job, delay } => {
                assert_eq!(delay, Duration::from_secs(30));
                assert_eq!(job.attempt, 2);
            }
            other => panic!("expected retry, got {other:?}"),
        }
        let message = gateway.message(id).await;
        assert_eq!(message.status, MessageStatus::Sending);
        assert_eq!(message.error_message.as_deref(), Some("connection timed out"));
    }

    #[tokio::test]
    async fn test_final_failure_marks_message_failed_once() {
        let gateway = TestGateway::new(sms_providers(&[("beem", 90)]));
        gateway.register(ScriptedAdapter::failing("beem", "HTTP 500 from upstream"));
        let id = queued_message(
            &gateway,
            SendRequest::new("sms", "+255712345678", "hi").with_webhook_url("https://client.test/hook"),
        )
        .await;

        let mut queued = QueuedJob::new(Box::new(DispatchJob::new(id, None)), QueuePriority::Default);
        queued.attempt = 3;
        assert!(matches!(
            gateway.run_job(queued).await,
            JobDisposition::Failed(GatewayError::ProviderFailed { .. })
        ));

        let message = gateway.message(id).await;
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.retry_count, 3);
        assert!(message.failed_at.is_some());
        assert!(message.error_message.is_some());

        let webhook = gateway.next_job().expect("failed webhook enqueued");
        assert_eq!(webhook.job.name(), "webhook_delivery");
        assert!(gateway.next_job().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_message_is_discarded() {
        let gateway = TestGateway::new(sms_providers(&[("beem", 90)]));
        let beem = gateway.register(ScriptedAdapter::succeeding("beem"));
        let id = queued_message(&gateway, SendRequest::new("sms", "+255712345678", "hi")).await;
        gateway.orchestrator.cancel(id).await.unwrap();

        let job = QueuedJob::new(Box::new(DispatchJob::new(id, None)), QueuePriority::Default);
        assert!(matches!(gateway.run_job(job).await, JobDisposition::Discarded(_)));
        assert_eq!(beem.calls(), 0);
        assert_eq!(gateway.message(id).await.status, MessageStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_throttled_dispatch_is_released_without_a_try() {
        let providers = crate::config::ProvidersConfig::default().with_channel(
            crate::models::Channel::Sms,
            vec![crate::config::ProviderEntry::new("beem", 90).with_rate_limit(1, 60)],
        );
        let gateway = TestGateway::new(providers);
        let beem = gateway.register(ScriptedAdapter::succeeding("beem"));
        let first = queued_message(&gateway, SendRequest::new("sms", "+255712345678", "one")).await;
        let second = queued_message(&gateway, SendRequest::new("sms", "+255712345679", "two")).await;

        let job = QueuedJob::new(Box::new(DispatchJob::new(first, None)), QueuePriority::Default);
        assert!(matches!(gateway.run_job(job).await, JobDisposition::Completed));

        let job = QueuedJob::new(Box::new(DispatchJob::new(second, None)), QueuePriority::Default);
        match gateway.run_job(job).await {
            JobDisposition::Released { job, delay } => {
                assert_eq!(job.attempt, 1);
                assert!(delay >= Duration::from_secs(1));
                assert!(delay <= Duration::from_secs(61));
            }
            other => panic!("expected release, got {other:?}"),
        }
        assert_eq!(beem.calls(), 1);
        assert_eq!(gateway.message(second).await.status, MessageStatus::Queued);
    }

    #[tokio::test]
    async fn test_webhook_follow_up_never_blocks_on_a_full_queue() {
        let mut config = TestGateway::config(sms_providers(&[("beem", 90)]));
        config.workers.queue_capacity = 1;
        let gateway = TestGateway::with_config(config);
        gateway.register(ScriptedAdapter::succeeding("beem"));

        // The queued dispatch job fills the single default slot
        let id = gateway
            .orchestrator
            .queue(
                SendRequest::new("sms", "+255712345678", "hi")
                    .with_webhook_url("https://client.test/hook"),
            )
            .await
            .unwrap();

        let job = QueuedJob::new(Box::new(DispatchJob::new(id, None)), QueuePriority::Default);
        let disposition = tokio::time::timeout(Duration::from_secs(2), gateway.run_job(job))
            .await
            .expect("dispatch finished while the partition was full");
        assert!(matches!(disposition, JobDisposition::Completed));
        assert_eq!(gateway.message(id).await.status, MessageStatus::Sent);

        let parked = gateway.next_job().expect("original dispatch job");
        assert_eq!(parked.job.name(), "dispatch");

        let mut webhook = None;
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if let Some(job) = gateway.next_job() {
                webhook = Some(job);
                break;
            }
        }
        let webhook = webhook.expect("deferred webhook enqueued once room freed");
        assert_eq!(webhook.job.name(), "webhook_delivery");
    }
}

//! Multi-provider dispatch job.
//!
//! Within one try the job walks the channel's available providers best
//! first, skipping those whose adapter reports unhealthy or whose throttle
//! window is exhausted, and moves on to the next candidate as soon as one
//! fails. Only when every candidate has failed does the try fail and consume
//! one of the job's outer retries.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{begin_sending, Job, JobContext, JobOutcome, JobPolicy};
use crate::error::{GatewayError, Result};
use crate::models::{Channel, Message, MessageUpdate, Metadata, WebhookEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverDispatchJob {
    pub message_id: Uuid,
    /// Tried first when available
    pub preferred: Option<String>,
    /// Providers attempted during the current try
    attempted: Vec<String>,
}

enum Candidate {
    Next(String),
    Exhausted,
}

impl FailoverDispatchJob {
    pub fn new(message_id: Uuid, preferred: Option<String>) -> Self {
        Self {
            message_id,
            preferred,
            attempted: Vec::new(),
        }
    }

    pub fn attempted(&self) -> &[String] {
        &self.attempted
    }

    async fn next_candidate(
        &self,
        ctx: &JobContext,
        channel: Channel,
        skip: &[String],
    ) -> Result<Candidate> {
        let selector = ctx.orchestrator.selector();

        if let Some(preferred) = &self.preferred {
            if !skip.contains(preferred)
                && ctx.config.providers.entry(channel, preferred).is_some_and(|e| e.enabled)
                && selector.is_available(preferred).await
            {
                return Ok(Candidate::Next(preferred.clone()));
            }
        }

        let ranked = selector.available_providers(channel, skip).await;
        if let Some(best) = ranked.first() {
            return Ok(Candidate::Next(best.id.clone()));
        }

        // Nothing healthy: on the first pick fall back to the provider that
        // has gone longest without failing
        if skip.is_empty() {
            return Ok(match selector.select_excluding(channel, skip).await? {
                Some(provider) => Candidate::Next(provider),
                None => Candidate::Exhausted,
            });
        }
        Ok(Candidate::Exhausted)
    }

    /// Check the provider's throttle; `Some(delay)` when it must be skipped
    async fn throttle_delay(
        &self,
        ctx: &JobContext,
        channel: Channel,
        provider: &str,
    ) -> Option<Duration> {
        let limit = ctx
            .config
            .providers
            .entry(channel, provider)
            .and_then(|entry| entry.rate_limit)?;
        if ctx
            .rate_limiter
            .should_throttle(provider, channel, &limit)
            .await
        {
            return Some(ctx.rate_limiter.release_delay(provider, channel, &limit).await);
        }
        ctx.rate_limiter.hit(provider, channel, &limit).await;
        None
    }

    async fn record_route(&self, ctx: &JobContext, sent: &Message) -> Message {
        let mut metadata = Metadata::new();
        metadata.insert(
            "attempted_providers".to_string(),
            Value::from(self.attempted.clone()),
        );
        metadata.insert(
            "failover_occurred".to_string(),
            Value::Bool(self.attempted.len() > 1),
        );
        match ctx
            .store
            .update(sent.id, MessageUpdate::new().merge_metadata(metadata))
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                warn!(message_id = %sent.id, error = %e, "⚠️ Could not record failover route");
                sent.clone()
            }
        }
    }
}

#[async_trait]
impl Job for FailoverDispatchJob {
    fn name(&self) -> &'static str {
        "failover_dispatch"
    }

    fn policy(&self, ctx: &JobContext) -> JobPolicy {
        ctx.config.jobs.failover.to_policy()
    }

    async fn handle(&mut self, ctx: &JobContext, attempt: u32) -> Result<JobOutcome> {
        self.attempted.clear();

        let mut message = ctx.load_message(self.message_id).await?;
        if !message.status.is_dispatchable() {
            return Ok(JobOutcome::Discard(format!(
                "message is {}",
                message.status
            )));
        }
        let channel = message.channel;
        // Stays `queued` until a candidate clears its checks
        let mut sending = false;

        let mut skipped: Vec<String> = Vec::new();
        let mut release_after: Option<Duration> = None;

        loop {
            let skip: Vec<String> = self.attempted.iter().chain(skipped.iter()).cloned().collect();
            let provider = match self.next_candidate(ctx, channel, &skip).await? {
                Candidate::Next(provider) => provider,
                Candidate::Exhausted => break,
            };

            let adapter = match ctx.orchestrator.registry().get(&provider) {
                Ok(adapter) => adapter,
                Err(e) => {
                    warn!(provider = %provider, error = %e, "⚠️ Skipping unregistered provider");
                    skipped.push(provider);
                    continue;
                }
            };
            if !adapter.is_healthy().await {
                warn!(
                    message_id = %message.id,
                    provider = %provider,
                    "⚠️ Provider reports unhealthy - skipping"
                );
                skipped.push(provider);
                continue;
            }
            if let Some(delay) = self.throttle_delay(ctx, channel, &provider).await {
                debug!(
                    provider = %provider,
                    delay_seconds = delay.as_secs(),
                    "⏳ Provider throttled - trying next"
                );
                release_after = Some(release_after.map_or(delay, |d| d.min(delay)));
                skipped.push(provider);
                continue;
            }

            if !sending {
                let Some(started) = begin_sending(ctx, message, attempt).await? else {
                    return Ok(JobOutcome::Discard(
                        "message can no longer be dispatched".to_string(),
                    ));
                };
                message = started;
                sending = true;
            }

            self.attempted.push(provider.clone());
            match ctx.orchestrator.deliver(&message, &provider).await {
                Ok(sent) => {
                    let sent = self.record_route(ctx, &sent).await;
                    info!(
                        message_id = %sent.id,
                        provider = %provider,
                        attempt = attempt,
                        attempted = ?self.attempted,
                        failover = self.attempted.len() > 1,
                        "✅ Message dispatched"
                    );
                    let data = json!({
                        "provider": provider,
                        "external_id": sent.external_id,
                        "attempt": attempt,
                        "attempted_providers": self.attempted,
                    });
                    ctx.notify_webhook(&sent, WebhookEvent::Sent, data).await;
                    return Ok(JobOutcome::Completed);
                }
                Err(GatewayError::ProviderFailed { kind, message: error, .. }) => {
                    warn!(
                        message_id = %message.id,
                        provider = %provider,
                        error_kind = %kind,
                        error = %error,
                        "🔀 Provider failed - failing over"
                    );
                    // Pick up the error the orchestrator stored
                    match ctx.store.find(message.id).await {
                        Ok(Some(latest)) => message = latest,
                        Ok(None) => {}
                        Err(e) => {
                            warn!(
                                message_id = %message.id,
                                error = %e,
                                "⚠️ Could not reload message after provider failure"
                            );
                        }
                    }
                }
                Err(other) => return Err(other),
            }
        }

        if self.attempted.is_empty() {
            if let Some(delay) = release_after {
                return Ok(JobOutcome::Release(delay));
            }
            return Err(GatewayError::NoProviderAvailable {
                channel: channel.to_string(),
            });
        }
        Err(GatewayError::AllProvidersFailed {
            channel: channel.to_string(),
            attempted: self.attempted.clone(),
        })
    }

    async fn on_final_failure(&mut self, ctx: &JobContext, attempts: u32, error: &GatewayError) {
        ctx.mark_failed(self.message_id, attempts, error).await;
    }
}

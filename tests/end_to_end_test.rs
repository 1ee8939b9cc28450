//! Whole-engine scenarios over in-memory stores and a manual clock

mod support;

use std::time::Duration;

use notify_gateway::config::{ProviderEntry, ProvidersConfig, RateLimitConfig};
use notify_gateway::models::{Channel, CircuitState, SendRequest};
use notify_gateway::queue::JobDisposition;
use notify_gateway::test_helpers::{sms_providers, ScriptedAdapter, TestGateway};
use notify_gateway::{GatewayError, MessageStatus, WorkerPool};
use serde_json::json;
use support::init_tracing;
use tokio_test::{assert_err, assert_ok};

fn otp(recipient: &str) -> SendRequest {
    SendRequest::new("sms", recipient, "Your code is 4821")
}

#[tokio::test]
async fn test_traffic_moves_off_a_failing_provider_and_back() {
    init_tracing();
    let gateway = TestGateway::new(sms_providers(&[("beem", 90), ("termii", 60)]));
    let beem = gateway.register(ScriptedAdapter::failing("beem", "HTTP 503 Service Unavailable"));
    let termii = gateway.register(ScriptedAdapter::succeeding("termii"));

    for _ in 0..5 {
        let error = assert_err!(gateway.orchestrator.send(otp("+255712345678")).await);
        assert!(matches!(error, GatewayError::ProviderFailed { ref provider, .. } if provider == "beem"));
    }
    assert_eq!(beem.calls(), 5);
    assert_eq!(gateway.health.circuit_state("beem").await, CircuitState::Open);

    let receipt = assert_ok!(gateway.orchestrator.send(otp("+255712345679")).await);
    assert_eq!(receipt.provider.as_deref(), Some("termii"));
    assert_eq!(receipt.status, MessageStatus::Sent);
    assert_eq!(termii.calls(), 1);

    gateway.clock.advance_secs(30);
    let receipt = assert_ok!(gateway.orchestrator.send(otp("+255712345680")).await);
    assert_eq!(receipt.provider.as_deref(), Some("termii"));

    beem.set_failing(None);
    gateway.clock.advance_secs(30);
    let receipt = assert_ok!(gateway.orchestrator.send(otp("+255712345681")).await);
    assert_eq!(receipt.provider.as_deref(), Some("beem"));
    assert_eq!(gateway.health.circuit_state("beem").await, CircuitState::HalfOpen);
}

#[tokio::test]
async fn test_every_failed_send_is_recorded_on_its_message() {
    let gateway = TestGateway::new(sms_providers(&[("beem", 90)]));
    gateway.register(ScriptedAdapter::failing("beem", "invalid credentials"));

    for n in 0..3 {
        let _ = gateway.orchestrator.send(otp(&format!("+25571234567{n}"))).await;
    }

    let messages = gateway.messages.all();
    assert_eq!(messages.len(), 3);
    for message in messages {
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.provider.as_deref(), Some("beem"));
        assert!(message
            .error_message
            .as_deref()
            .is_some_and(|error| error.contains("invalid credentials")));
        assert!(message.failed_at.is_some());
    }
}

#[tokio::test]
async fn test_throttle_window_blocks_then_resets() {
    let gateway = TestGateway::new(sms_providers(&[("beem", 90)]));
    let limiter = &gateway.context.rate_limiter;
    let limit = RateLimitConfig {
        max_attempts: 2,
        window_seconds: 1,
    };

    for expected in 1..=2 {
        assert!(!limiter.should_throttle("beem", Channel::Sms, &limit).await);
        assert_eq!(limiter.hit("beem", Channel::Sms, &limit).await, expected);
    }
    assert!(limiter.should_throttle("beem", Channel::Sms, &limit).await);
    assert!(!limiter.should_throttle("beem", Channel::Whatsapp, &limit).await);
    assert_eq!(limiter.remaining_attempts("beem", Channel::Sms, &limit).await, 0);

    gateway.clock.advance_secs(1);
    assert!(!limiter.should_throttle("beem", Channel::Sms, &limit).await);
    assert_eq!(limiter.remaining_attempts("beem", Channel::Sms, &limit).await, 2);
}

#[tokio::test]
async fn test_failover_job_reaches_the_second_provider() {
    let gateway = TestGateway::new(sms_providers(&[("beem", 90), ("termii", 60)]));
    gateway.register(ScriptedAdapter::failing("beem", "connection reset by peer"));
    gateway.register(ScriptedAdapter::succeeding("termii"));

    let id = gateway
        .orchestrator
        .queue(
            otp("+255712345678")
                .with_failover(true)
                .with_webhook_url("https://client.test/hook"),
        )
        .await
        .unwrap();
    assert_eq!(gateway.message(id).await.status, MessageStatus::Queued);

    let results = gateway.run_queued().await;
    let names: Vec<&str> = results.iter().map(|(name, _)| *name).collect();
    assert_eq!(names, vec!["failover_dispatch", "webhook_delivery"]);
    assert!(results
        .iter()
        .all(|(_, disposition)| matches!(disposition, JobDisposition::Completed)));

    let message = gateway.message(id).await;
    assert_eq!(message.status, MessageStatus::Sent);
    assert_eq!(message.provider.as_deref(), Some("termii"));
    assert_eq!(message.external_id.as_deref(), Some("termii-1"));
    assert_eq!(message.metadata["attempted_providers"], json!(["beem", "termii"]));
    assert_eq!(message.metadata["failover_occurred"], json!(true));
    assert_eq!(message.webhook_attempts, 1);
    assert!(message.webhook_delivered);
}

#[tokio::test]
async fn test_cancelled_message_is_never_sent() {
    let gateway = TestGateway::new(sms_providers(&[("beem", 90)]));
    let beem = gateway.register(ScriptedAdapter::succeeding("beem"));

    let id = gateway.orchestrator.queue(otp("+255712345678")).await.unwrap();
    let cancelled = assert_ok!(gateway.orchestrator.cancel(id).await);
    assert_eq!(cancelled.status, MessageStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    let results = gateway.run_queued().await;
    assert!(matches!(results[0].1, JobDisposition::Discarded(_)));
    assert_eq!(beem.calls(), 0);
    assert_eq!(gateway.message(id).await.status, MessageStatus::Cancelled);

    assert_err!(gateway.orchestrator.cancel(id).await);
}

#[tokio::test]
async fn test_worker_pool_drains_queued_messages() {
    init_tracing();
    let providers = ProvidersConfig::default().with_channel(
        Channel::Sms,
        vec![
            ProviderEntry::new("beem", 90),
            ProviderEntry::new("termii", 60),
        ],
    );
    let mut gateway = TestGateway::new(providers);
    gateway.register(ScriptedAdapter::succeeding("beem"));
    gateway.register(ScriptedAdapter::succeeding("termii"));

    let mut ids = Vec::new();
    for n in 0..6 {
        let request = otp(&format!("+25571234560{n}"))
            .with_failover(n % 2 == 0)
            .with_webhook_url("https://client.test/hook");
        ids.push(gateway.orchestrator.queue(request).await.unwrap());
    }

    let receivers = gateway.take_receivers().expect("receivers available");
    let pool = WorkerPool::start(gateway.context.clone(), receivers, &Default::default());

    let mut settled = false;
    for _ in 0..200 {
        let messages = gateway.messages.all();
        if messages
            .iter()
            .all(|m| m.status == MessageStatus::Sent && m.webhook_delivered)
        {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(settled, "all messages sent and acknowledged");
    assert_eq!(gateway.webhooks.requests().len(), ids.len());

    assert!(pool.shutdown().await);
}

// Test Helpers Module - in-memory gateway wiring for unit and integration tests
//
// Scripted provider adapters, a recording webhook transport and `TestGateway`,
// which bootstraps the whole engine over in-memory stores and a manual clock.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::bootstrap::{GatewayBootstrap, GatewayParts};
use crate::config::{GatewayConfig, ProviderEntry, ProvidersConfig};
use crate::error::Result;
use crate::jobs::JobContext;
use crate::models::{Channel, Message};
use crate::orchestration::DispatchOrchestrator;
use crate::providers::{
    ProviderAdapter, ProviderFailure, ProviderReceipt, ProviderRegistry, ProviderRequest,
    ProviderResult,
};
use crate::queue::{process_job, JobDisposition, JobReceivers, QueuedJob};
use crate::resilience::HealthMonitor;
use crate::store::{InMemoryCounterStore, InMemoryMessageStore, MessageStore};
use crate::utils::ManualClock;
use crate::webhook::{WebhookRequest, WebhookResponse, WebhookTransport};

/// `sms` providers as `(id, priority)` in configuration order
pub fn sms_providers(providers: &[(&str, i64)]) -> ProvidersConfig {
    ProvidersConfig::default().with_channel(
        Channel::Sms,
        providers
            .iter()
            .map(|(id, priority)| ProviderEntry::new(*id, *priority))
            .collect(),
    )
}

/// Provider adapter that replays scripted outcomes
#[derive(Debug)]
pub struct ScriptedAdapter {
    id: String,
    script: Mutex<VecDeque<std::result::Result<(), String>>>,
    failure: Mutex<Option<String>>,
    healthy: AtomicBool,
    calls: AtomicUsize,
    response_time_ms: u64,
    cost: Option<f64>,
    delay: Option<Duration>,
}

impl ScriptedAdapter {
    /// Always succeeds unless scripted otherwise
    pub fn succeeding(id: &str) -> Self {
        Self {
            id: id.to_string(),
            script: Mutex::new(VecDeque::new()),
            failure: Mutex::new(None),
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            response_time_ms: 100,
            cost: None,
            delay: None,
        }
    }

    /// Always fails with `error` unless scripted otherwise
    pub fn failing(id: &str, error: &str) -> Self {
        let adapter = Self::succeeding(id);
        *adapter.failure.lock() = Some(error.to_string());
        adapter
    }

    pub fn with_response_time(mut self, response_time_ms: u64) -> Self {
        self.response_time_ms = response_time_ms;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue outcomes consumed before the default behaviour applies
    pub fn script(&self, outcomes: Vec<std::result::Result<(), String>>) {
        self.script.lock().extend(outcomes);
    }

    /// Switch the default behaviour
    pub fn set_failing(&self, error: Option<&str>) {
        *self.failure.lock() = error.map(str::to_string);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, _request: &ProviderRequest) -> ProviderResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().pop_front();
        let outcome = match scripted {
            Some(outcome) => outcome,
            None => match self.failure.lock().clone() {
                Some(error) => Err(error),
                None => Ok(()),
            },
        };

        match outcome {
            Ok(()) => {
                let receipt =
                    ProviderReceipt::new(format!("{}-{call}", self.id), self.response_time_ms);
                Ok(match self.cost {
                    Some(cost) => receipt.with_cost(cost),
                    None => receipt,
                })
            }
            Err(error) => Err(ProviderFailure::new(error, self.response_time_ms)),
        }
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Webhook transport that records requests and answers with scripted statuses
#[derive(Debug, Default)]
pub struct RecordingWebhookTransport {
    requests: Mutex<Vec<WebhookRequest>>,
    statuses: Mutex<VecDeque<u16>>,
    default_status: Mutex<Option<u16>>,
}

impl RecordingWebhookTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next requests with `statuses`, then keep repeating the last one
    pub fn respond_with(&self, statuses: &[u16]) {
        self.statuses.lock().extend(statuses.iter().copied());
        *self.default_status.lock() = statuses.last().copied();
    }

    pub fn requests(&self) -> Vec<WebhookRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl WebhookTransport for RecordingWebhookTransport {
    async fn post(&self, request: &WebhookRequest) -> Result<WebhookResponse> {
        self.requests.lock().push(request.clone());
        let status = self
            .statuses
            .lock()
            .pop_front()
            .or(*self.default_status.lock())
            .unwrap_or(200);
        Ok(WebhookResponse { status })
    }
}

/// The whole engine over in-memory stores and a manual clock
#[derive(Debug)]
pub struct TestGateway {
    pub orchestrator: Arc<DispatchOrchestrator>,
    pub context: JobContext,
    pub health: HealthMonitor,
    pub messages: Arc<InMemoryMessageStore>,
    pub counters: Arc<InMemoryCounterStore>,
    pub registry: Arc<ProviderRegistry>,
    pub webhooks: Arc<RecordingWebhookTransport>,
    pub clock: Arc<ManualClock>,
    receivers: Mutex<Option<JobReceivers>>,
}

impl TestGateway {
    pub const WEBHOOK_SECRET: &'static str = "test-webhook-signing-secret";

    /// Default configuration with `providers` and a webhook secret
    pub fn config(providers: ProvidersConfig) -> GatewayConfig {
        let mut config = GatewayConfig {
            providers,
            ..GatewayConfig::default()
        };
        config.webhook.secret = Some(Self::WEBHOOK_SECRET.to_string());
        config
    }

    pub fn new(providers: ProvidersConfig) -> Self {
        Self::with_config(Self::config(providers))
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        let clock = ManualClock::starting_now();
        let messages = Arc::new(InMemoryMessageStore::with_clock(clock.clone()));
        let counters = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
        let registry = Arc::new(ProviderRegistry::new());
        let webhooks = Arc::new(RecordingWebhookTransport::new());

        let parts = GatewayParts {
            counter_store: counters.clone(),
            message_store: messages.clone(),
            registry: registry.clone(),
            webhook_transport: webhooks.clone(),
            clock: clock.clone(),
        };
        let mut bootstrap =
            GatewayBootstrap::from_parts(config, parts).expect("valid test configuration");
        let receivers = bootstrap.take_receivers();

        Self {
            orchestrator: bootstrap.orchestrator(),
            context: bootstrap.context().clone(),
            health: bootstrap.health().clone(),
            messages,
            counters,
            registry,
            webhooks,
            clock,
            receivers: Mutex::new(receivers),
        }
    }

    /// Register an adapter and keep a handle for assertions
    pub fn register(&self, adapter: ScriptedAdapter) -> Arc<ScriptedAdapter> {
        let adapter = Arc::new(adapter);
        self.registry.register(adapter.clone());
        adapter
    }

    pub async fn message(&self, id: Uuid) -> Message {
        self.messages
            .find(id)
            .await
            .expect("message store available")
            .expect("message exists")
    }

    /// Next job waiting in the queue, highest partition first
    pub fn next_job(&self) -> Option<QueuedJob> {
        self.receivers.lock().as_mut().and_then(JobReceivers::try_next)
    }

    pub async fn run_job(&self, job: QueuedJob) -> JobDisposition {
        process_job(&self.context, job).await
    }

    /// Run every job currently queued, including jobs they enqueue, once each
    pub async fn run_queued(&self) -> Vec<(&'static str, JobDisposition)> {
        let mut results = Vec::new();
        while let Some(job) = self.next_job() {
            let name = job.job.name();
            results.push((name, self.run_job(job).await));
        }
        results
    }

    /// Hand the queue's receiving side to a worker pool
    pub fn take_receivers(&mut self) -> Option<JobReceivers> {
        self.receivers.get_mut().take()
    }
}

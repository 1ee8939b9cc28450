//! # Providers
//!
//! The contract every upstream vendor integration implements, the registry
//! that maps configured provider ids to adapters, and the selector that ranks
//! them per channel.
//!
//! Adapters report failures as values: `send` returns
//! `Result<ProviderReceipt, ProviderFailure>` and never panics for vendor
//! errors. The vendor wire formats themselves live outside this crate.

pub mod registry;
pub mod selector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Channel, Message, Metadata};
use crate::orchestration::error_classifier::ErrorKind;

pub use registry::ProviderRegistry;
pub use selector::{ProviderSelector, ScoredProvider};

/// What an adapter needs to send one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub message_id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    pub body: String,
    pub subject: Option<String>,
    pub metadata: Metadata,
}

impl From<&Message> for ProviderRequest {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id,
            channel: message.channel,
            recipient: message.recipient.clone(),
            body: message.body.clone(),
            subject: message.subject.clone(),
            metadata: message.metadata.clone(),
        }
    }
}

/// Accepted send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderReceipt {
    /// Provider-assigned id, used to correlate delivery callbacks
    pub provider_message_id: Option<String>,
    pub cost: Option<f64>,
    pub response_time_ms: u64,
}

impl ProviderReceipt {
    pub fn new(provider_message_id: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            provider_message_id: Some(provider_message_id.into()),
            cost: None,
            response_time_ms,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// Rejected or failed send
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub response_time_ms: u64,
}

impl ProviderFailure {
    /// Failure whose kind is classified from the message text
    pub fn new(message: impl Into<String>, response_time_ms: u64) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::classify(&message),
            message,
            response_time_ms,
        }
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

pub type ProviderResult = Result<ProviderReceipt, ProviderFailure>;

/// Contract implemented once per upstream vendor
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Identifier matching the provider `id` in configuration
    fn id(&self) -> &str;

    async fn send(&self, request: &ProviderRequest) -> ProviderResult;

    /// Vendor-side health probe
    async fn is_healthy(&self) -> bool {
        true
    }
}

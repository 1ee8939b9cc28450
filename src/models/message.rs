//! # Message Model
//!
//! A single notification attempt and the typed inputs and partial updates that
//! create and mutate it. Messages are never deleted; they only move through
//! [`MessageStatus`] transitions until they reach a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::channel::Channel;
use crate::error::{GatewayError, Result};
use crate::state_machine::MessageStatus;

/// Opaque caller-supplied key/value bag
pub type Metadata = HashMap<String, serde_json::Value>;

/// Queue partition a send is scheduled on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueuePriority {
    High,
    #[default]
    Default,
    Low,
}

impl QueuePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Default => "default",
            Self::Low => "low",
        }
    }
}

/// Request to send one notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Raw channel name; validated before anything is persisted
    pub channel: String,
    pub recipient: String,
    pub body: String,
    #[serde(default)]
    pub subject: Option<String>,
    /// Pin a specific provider instead of letting the selector choose
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub priority: QueuePriority,
    /// Queue through the multi-provider failover job
    #[serde(default)]
    pub failover: bool,
}

impl SendRequest {
    pub fn new(
        channel: impl Into<String>,
        recipient: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            recipient: recipient.into(),
            body: body.into(),
            subject: None,
            provider: None,
            webhook_url: None,
            metadata: Metadata::new(),
            priority: QueuePriority::Default,
            failover: false,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_priority(mut self, priority: QueuePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_failover(mut self, failover: bool) -> Self {
        self.failover = failover;
        self
    }

    /// Validate caller input and produce the message to persist
    pub fn validate(&self) -> Result<NewMessage> {
        let channel: Channel = self.channel.parse()?;

        let recipient = self.recipient.trim();
        if recipient.is_empty() {
            return Err(GatewayError::Validation("recipient is required".to_string()));
        }
        if channel.uses_phone_numbers() && !is_phone_number(recipient) {
            return Err(GatewayError::Validation(format!(
                "recipient {recipient} is not a valid phone number"
            )));
        }
        if channel == Channel::Email && !is_email_address(recipient) {
            return Err(GatewayError::Validation(format!(
                "recipient {recipient} is not a valid email address"
            )));
        }
        if self.body.trim().is_empty() {
            return Err(GatewayError::Validation("body is required".to_string()));
        }
        if let Some(url) = &self.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(GatewayError::Validation(format!(
                    "webhook_url {url} must be an http(s) URL"
                )));
            }
        }

        Ok(NewMessage {
            channel,
            recipient: recipient.to_string(),
            body: self.body.clone(),
            subject: match channel {
                Channel::Email => self.subject.clone(),
                _ => None,
            },
            webhook_url: self.webhook_url.clone(),
            metadata: self.metadata.clone(),
        })
    }
}

fn is_phone_number(value: &str) -> bool {
    let digits = value.strip_prefix('+').unwrap_or(value);
    (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

fn is_email_address(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Validated input for a new message row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub channel: Channel,
    pub recipient: String,
    pub body: String,
    pub subject: Option<String>,
    pub webhook_url: Option<String>,
    pub metadata: Metadata,
}

/// A single notification attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    pub body: String,
    pub subject: Option<String>,
    pub status: MessageStatus,
    pub provider: Option<String>,
    pub external_id: Option<String>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub cost: Option<f64>,
    pub webhook_url: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub webhook_delivered: bool,
    pub webhook_attempts: u32,
    pub webhook_error: Option<String>,
    pub webhook_failed_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn from_new(new: NewMessage, status: MessageStatus, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: new.channel,
            recipient: new.recipient,
            body: new.body,
            subject: new.subject,
            status,
            provider: None,
            external_id: None,
            retry_count: 0,
            error_message: None,
            cost: None,
            webhook_url: new.webhook_url,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
            sent_at: None,
            delivered_at: None,
            failed_at: None,
            cancelled_at: None,
            webhook_delivered: false,
            webhook_attempts: 0,
            webhook_error: None,
            webhook_failed_at: None,
        }
    }

    pub fn has_webhook(&self) -> bool {
        self.webhook_url.is_some()
    }
}

/// Partial update of a message; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub status: Option<MessageStatus>,
    pub provider: Option<String>,
    pub external_id: Option<String>,
    pub retry_count: Option<u32>,
    pub error_message: Option<String>,
    pub cost: Option<f64>,
    pub metadata: Option<Metadata>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub webhook_delivered: Option<bool>,
    pub webhook_attempts: Option<u32>,
    pub webhook_error: Option<String>,
    pub webhook_failed_at: Option<DateTime<Utc>>,
}

impl MessageUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id;
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn error_message(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn cost(mut self, cost: Option<f64>) -> Self {
        self.cost = cost;
        self
    }

    pub fn merge_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn sent_at(mut self, at: DateTime<Utc>) -> Self {
        self.sent_at = Some(at);
        self
    }

    pub fn delivered_at(mut self, at: DateTime<Utc>) -> Self {
        self.delivered_at = Some(at);
        self
    }

    pub fn failed_at(mut self, at: DateTime<Utc>) -> Self {
        self.failed_at = Some(at);
        self
    }

    pub fn cancelled_at(mut self, at: DateTime<Utc>) -> Self {
        self.cancelled_at = Some(at);
        self
    }

    /// Record a successful webhook delivery on attempt `attempts`
    pub fn webhook_delivered(mut self, attempts: u32) -> Self {
        self.webhook_delivered = Some(true);
        self.webhook_attempts = Some(attempts);
        self
    }

    /// Record an undelivered webhook attempt
    pub fn webhook_attempt_failed(mut self, attempts: u32, error: impl Into<String>) -> Self {
        self.webhook_attempts = Some(attempts);
        self.webhook_error = Some(error.into());
        self
    }

    /// Stamp the webhook as permanently failed
    pub fn webhook_failed(mut self, error: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.webhook_error = Some(error.into());
        self.webhook_failed_at = Some(at);
        self
    }

    /// Apply to a message. `retry_count` never decreases and metadata is merged.
    pub fn apply(&self, message: &mut Message, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            message.status = status;
        }
        if let Some(provider) = &self.provider {
            message.provider = Some(provider.clone());
        }
        if let Some(external_id) = &self.external_id {
            message.external_id = Some(external_id.clone());
        }
        if let Some(retry_count) = self.retry_count {
            message.retry_count = message.retry_count.max(retry_count);
        }
        if let Some(error) = &self.error_message {
            message.error_message = Some(error.clone());
        }
        if let Some(cost) = self.cost {
            message.cost = Some(cost);
        }
        if let Some(metadata) = &self.metadata {
            message
                .metadata
                .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(at) = self.sent_at {
            message.sent_at = Some(at);
        }
        if let Some(at) = self.delivered_at {
            message.delivered_at = Some(at);
        }
        if let Some(at) = self.failed_at {
            message.failed_at = Some(at);
        }
        if let Some(at) = self.cancelled_at {
            message.cancelled_at = Some(at);
        }
        if let Some(delivered) = self.webhook_delivered {
            message.webhook_delivered = delivered;
        }
        if let Some(attempts) = self.webhook_attempts {
            message.webhook_attempts = message.webhook_attempts.max(attempts);
        }
        if let Some(error) = &self.webhook_error {
            message.webhook_error = Some(error.clone());
        }
        if let Some(at) = self.webhook_failed_at {
            message.webhook_failed_at = Some(at);
        }
        message.updated_at = now;
    }
}

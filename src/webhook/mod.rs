//! # Outbound Webhooks
//!
//! Builds, signs and posts the callback a client registered on a message.
//! Retrying is owned by [`crate::jobs::WebhookDeliveryJob`]; this module
//! performs exactly one attempt per call.

pub mod payload;
pub mod signing;
pub mod transport;

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::config::{ConfigurationError, WebhookConfig};
use crate::constants::webhook as headers;
use crate::error::{GatewayError, Result};
use crate::logging::log_webhook_operation;
use crate::models::{Message, WebhookDeliveryAttempt, WebhookEvent};
use crate::utils::SharedClock;

pub use payload::{build_payload, delivered_data, failed_data};
pub use signing::{attach_signature, sign_payload, verify_payload, verify_signature};
pub use transport::{HttpWebhookTransport, WebhookRequest, WebhookResponse, WebhookTransport};

/// Signs and posts webhook payloads
#[derive(Clone)]
pub struct WebhookSender {
    transport: Arc<dyn WebhookTransport>,
    secret: Option<String>,
    clock: SharedClock,
}

impl std::fmt::Debug for WebhookSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSender")
            .field("signing", &self.secret.is_some())
            .finish_non_exhaustive()
    }
}

impl WebhookSender {
    pub fn new(
        transport: Arc<dyn WebhookTransport>,
        config: &WebhookConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            transport,
            secret: config.secret.clone(),
            clock,
        }
    }

    /// Signed request for one attempt
    pub fn build_request(
        &self,
        message: &Message,
        event: WebhookEvent,
        data: &Value,
        attempt: u32,
    ) -> Result<(WebhookRequest, String)> {
        let url = message.webhook_url.clone().ok_or_else(|| {
            GatewayError::Validation(format!("message {} has no webhook_url", message.id))
        })?;
        let secret = self.secret.as_deref().ok_or_else(|| {
            GatewayError::Configuration(ConfigurationError::missing_required_field(
                "secret", "webhook",
            ))
        })?;

        let now = self.clock.now();
        let mut payload = build_payload(message, event, data, now);
        let signature = attach_signature(secret.as_bytes(), &mut payload)?;
        let body = serde_json::to_vec(&payload)
            .map_err(|e| GatewayError::Webhook(format!("Failed to encode payload: {e}")))?;

        let request = WebhookRequest {
            url,
            headers: vec![
                (headers::HEADER_EVENT.to_string(), event.qualified_name()),
                (headers::HEADER_MESSAGE_ID.to_string(), message.id.to_string()),
                (headers::HEADER_ATTEMPT.to_string(), attempt.to_string()),
                (headers::HEADER_SIGNATURE.to_string(), signature.clone()),
                (headers::HEADER_TIMESTAMP.to_string(), now.timestamp().to_string()),
            ],
            body,
        };
        Ok((request, signature))
    }

    /// Perform one delivery attempt. Configuration problems are errors;
    /// transport failures and non-2xx answers come back as an undelivered
    /// attempt.
    pub async fn deliver(
        &self,
        message: &Message,
        event: WebhookEvent,
        data: &Value,
        attempt: u32,
    ) -> Result<WebhookDeliveryAttempt> {
        let (request, signature) = self.build_request(message, event, data, attempt)?;
        debug!(
            message_id = %message.id,
            event = %event,
            attempt = attempt,
            "🔔 Posting webhook"
        );

        let outcome = match self.transport.post(&request).await {
            Ok(response) if response.is_success() => WebhookDeliveryAttempt {
                event,
                attempt_number: attempt,
                signature,
                response_status: Some(response.status),
                delivered: true,
                error: None,
            },
            Ok(response) => WebhookDeliveryAttempt {
                event,
                attempt_number: attempt,
                signature,
                response_status: Some(response.status),
                delivered: false,
                error: Some(format!("Webhook endpoint responded with HTTP {}", response.status)),
            },
            Err(e) => WebhookDeliveryAttempt {
                event,
                attempt_number: attempt,
                signature,
                response_status: None,
                delivered: false,
                error: Some(e.to_string()),
            },
        };

        log_webhook_operation(
            "deliver",
            &message.id.to_string(),
            event.as_str(),
            attempt,
            if outcome.delivered { "delivered" } else { "failed" },
            outcome.response_status,
        );
        Ok(outcome)
    }
}

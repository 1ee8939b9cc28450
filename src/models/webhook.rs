use serde::{Deserialize, Serialize};
use std::fmt;

/// Event reported to a client's callback URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    Sent,
    Delivered,
    Failed,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// Name used in the payload's `event` field and the event header
    pub fn qualified_name(&self) -> String {
        format!("message.{}", self.as_str())
    }
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one POST to a client's callback URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDeliveryAttempt {
    pub event: WebhookEvent,
    pub attempt_number: u32,
    pub signature: String,
    pub response_status: Option<u16>,
    pub delivered: bool,
    pub error: Option<String>,
}

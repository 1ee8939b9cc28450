use super::states::MessageStatus;
use serde::{Deserialize, Serialize};

/// Delivery event reported by a provider callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryEvent {
    Sent,
    Delivered,
    Failed,
    Bounced,
    Undelivered,
    Rejected,
    Cancelled,
}

impl DeliveryEvent {
    /// Internal status an event moves a message to
    pub fn target_status(&self) -> MessageStatus {
        match self {
            Self::Sent => MessageStatus::Sent,
            Self::Delivered => MessageStatus::Delivered,
            Self::Failed | Self::Bounced | Self::Undelivered | Self::Rejected => {
                MessageStatus::Failed
            }
            Self::Cancelled => MessageStatus::Cancelled,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Bounced => "bounced",
            Self::Undelivered => "undelivered",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the event reports a failed delivery
    pub fn is_failure(&self) -> bool {
        self.target_status() == MessageStatus::Failed
    }
}

impl std::str::FromStr for DeliveryEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sent" | "accepted" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "bounced" => Ok(Self::Bounced),
            "undelivered" => Ok(Self::Undelivered),
            "rejected" => Ok(Self::Rejected),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(format!("Unknown delivery event: {other}")),
        }
    }
}

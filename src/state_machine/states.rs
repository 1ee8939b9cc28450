use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Accepted but not yet handed to the queue
    #[default]
    Pending,
    /// Persisted and waiting for a worker
    Queued,
    /// A worker is talking to a provider
    Sending,
    /// Accepted by a provider
    Sent,
    /// Provider confirmed delivery to the recipient
    Delivered,
    /// Delivery failed; only an explicit retry leaves this state
    Failed,
    /// Cancelled before dispatch
    Cancelled,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 7] = [
        Self::Pending,
        Self::Queued,
        Self::Sending,
        Self::Sent,
        Self::Delivered,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Statuses reachable from this one
    pub fn allowed_targets(&self) -> &'static [MessageStatus] {
        use MessageStatus::*;
        match self {
            Pending => &[Queued, Sending, Sent, Failed, Cancelled],
            Queued => &[Sending, Sent, Failed, Cancelled],
            Sending => &[Sent, Delivered, Failed],
            Sent => &[Delivered, Failed],
            Delivered => &[],
            Failed => &[Queued, Sending],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: MessageStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Statuses from which `target` may be entered
    pub fn allowed_sources(target: MessageStatus) -> Vec<MessageStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|source| source.can_transition_to(target))
            .collect()
    }

    /// No further transition is permitted
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// A dispatch job may still act on a message in this status
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::Sending | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid message status: {s}")),
        }
    }
}

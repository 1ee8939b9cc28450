use crate::config::ConfigurationError;
use crate::orchestration::error_classifier::ErrorKind;
use crate::state_machine::MessageStatus;
use crate::store::StoreError;
use uuid::Uuid;

/// Errors surfaced by the dispatch engine's public API
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Unsupported channel: {0}")]
    InvalidChannel(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No provider available for channel {channel}")]
    NoProviderAvailable { channel: String },

    #[error("Provider {0} is not registered")]
    ProviderNotRegistered(String),

    #[error("Provider {provider} failed ({kind}): {message}")]
    ProviderFailed {
        provider: String,
        kind: ErrorKind,
        message: String,
    },

    #[error("All providers failed for channel {channel} (attempted: {})", attempted.join(", "))]
    AllProvidersFailed {
        channel: String,
        attempted: Vec<String>,
    },

    #[error("Message {0} not found")]
    MessageNotFound(Uuid),

    #[error("No message with external id {external_id} from provider {provider}")]
    ExternalIdNotFound {
        provider: String,
        external_id: String,
    },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("Operation timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job queue is closed")]
    QueueClosed,

    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl GatewayError {
    /// Caller-input errors surface immediately and are never retried
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidChannel(_)
                | Self::Validation(_)
                | Self::MessageNotFound(_)
                | Self::ExternalIdNotFound { .. }
                | Self::InvalidTransition { .. }
                | Self::Configuration(_)
        )
    }

    /// Classification used for logging and alerting
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProviderFailed { kind, .. } => *kind,
            Self::InvalidChannel(_) | Self::Validation(_) => ErrorKind::Validation,
            Self::Timeout { .. } => ErrorKind::Network,
            other => ErrorKind::classify(&other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

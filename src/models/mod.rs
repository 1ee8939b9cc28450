pub mod channel;
pub mod message;
pub mod provider_health;
pub mod webhook;

// Re-export core models for easy access
pub use channel::Channel;
pub use message::{Message, MessageUpdate, Metadata, NewMessage, QueuePriority, SendRequest};
pub use provider_health::{CircuitState, ProviderHealthRecord};
pub use webhook::{WebhookDeliveryAttempt, WebhookEvent};

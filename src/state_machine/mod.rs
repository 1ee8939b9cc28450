// Message status state machine
//
// The transition table lives on `MessageStatus`; stores consult it inside
// their atomic check-then-write and jobs consult it before acting on external
// delivery events.

pub mod events;
pub mod states;

pub use events::DeliveryEvent;
pub use states::MessageStatus;

use crate::error::{GatewayError, Result};

/// Validate a single transition against the table
pub fn validate_transition(from: MessageStatus, to: MessageStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(GatewayError::InvalidTransition { from, to })
    }
}

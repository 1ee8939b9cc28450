use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use super::MessageStore;
use crate::error::{GatewayError, Result};
use crate::models::{Message, MessageUpdate, NewMessage};
use crate::state_machine::{validate_transition, MessageStatus};
use crate::utils::{SharedClock, SystemClock};

/// Message store held in process memory
///
/// The write lock is held across the check-then-write of a transition, so
/// racing workers observe transitions in a single order.
#[derive(Debug)]
pub struct InMemoryMessageStore {
    messages: RwLock<HashMap<Uuid, Message>>,
    clock: SharedClock,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Snapshot of every message, oldest first
    pub fn all(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self.messages.read().values().cloned().collect();
        messages.sort_by_key(|m| m.created_at);
        messages
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn create(&self, message: NewMessage, status: MessageStatus) -> Result<Message> {
        let message = Message::from_new(message, status, self.clock.now());
        self.messages.write().insert(message.id, message.clone());
        Ok(message)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Message>> {
        Ok(self.messages.read().get(&id).cloned())
    }

    async fn find_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<Message>> {
        Ok(self
            .messages
            .read()
            .values()
            .find(|m| {
                m.provider.as_deref() == Some(provider)
                    && m.external_id.as_deref() == Some(external_id)
            })
            .cloned())
    }

    async fn update(&self, id: Uuid, mut update: MessageUpdate) -> Result<Message> {
        update.status = None;
        let mut messages = self.messages.write();
        let message = messages
            .get_mut(&id)
            .ok_or(GatewayError::MessageNotFound(id))?;
        update.apply(message, self.clock.now());
        Ok(message.clone())
    }

    async fn transition(
        &self,
        id: Uuid,
        target: MessageStatus,
        mut update: MessageUpdate,
    ) -> Result<Message> {
        let mut messages = self.messages.write();
        let message = messages
            .get_mut(&id)
            .ok_or(GatewayError::MessageNotFound(id))?;

        if let Err(e) = validate_transition(message.status, target) {
            warn!(
                message_id = %id,
                from = %message.status,
                to = %target,
                "⚠️ Rejected message status transition"
            );
            return Err(e);
        }

        update.status = Some(target);
        update.apply(message, self.clock.now());
        Ok(message.clone())
    }
}

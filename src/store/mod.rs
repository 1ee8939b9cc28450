//! # Stores
//!
//! Two narrow persistence contracts used by the dispatch engine:
//!
//! - [`CounterStore`]: the shared atomic counter store behind provider health
//!   records and throttle counters. Every mutation is an atomic primitive
//!   (increment, hash-field set with TTL) so concurrent workers never need a
//!   cross-process lock.
//! - [`MessageStore`]: persistence of [`Message`] rows, including an atomic
//!   check-then-write status transition.

pub mod counter_memory;
#[cfg(feature = "redis")]
pub mod counter_redis;
pub mod message_memory;
#[cfg(feature = "postgres")]
pub mod message_postgres;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Message, MessageUpdate, NewMessage};
use crate::state_machine::MessageStatus;

pub use counter_memory::InMemoryCounterStore;
#[cfg(feature = "redis")]
pub use counter_redis::RedisCounterStore;
pub use message_memory::InMemoryMessageStore;
#[cfg(feature = "postgres")]
pub use message_postgres::PgMessageStore;

/// Errors from the shared counter store
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    #[error("Counter store operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Counter store returned malformed data for {key}: {reason}")]
    Malformed { key: String, reason: String },

    #[error("Message store error: {0}")]
    Persistence(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Shared atomic counter store
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value of a counter, `None` when absent or expired
    async fn get(&self, key: &str) -> StoreResult<Option<i64>>;

    /// Atomically increment a counter; the TTL is set when the increment creates it
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> StoreResult<i64>;

    /// Remaining lifetime of a key
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// All fields of a hash, empty when absent or expired
    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Set hash fields and refresh the hash TTL
    async fn hash_set(&self, key: &str, fields: &[(String, String)], ttl: Duration)
        -> StoreResult<()>;

    /// Atomically increment one hash field and refresh the hash TTL
    async fn hash_incr(&self, key: &str, field: &str, by: i64, ttl: Duration) -> StoreResult<i64>;
}

/// Persistence of messages
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message in the given initial status
    async fn create(&self, message: NewMessage, status: MessageStatus) -> Result<Message>;

    async fn find(&self, id: Uuid) -> Result<Option<Message>>;

    async fn find_by_external_id(&self, provider: &str, external_id: &str)
        -> Result<Option<Message>>;

    /// Apply non-status fields. A `status` in the update is ignored; use
    /// [`MessageStore::transition`] to change status.
    async fn update(&self, id: Uuid, update: MessageUpdate) -> Result<Message>;

    /// Atomically validate `current -> target` against the transition table
    /// and apply `update` with it. Returns `InvalidTransition` without
    /// mutating when the table forbids the move.
    async fn transition(
        &self,
        id: Uuid,
        target: MessageStatus,
        update: MessageUpdate,
    ) -> Result<Message>;
}

//! PostgreSQL message store
//!
//! Expects the following table (migrations are owned by the embedding
//! application):
//!
//! ```sql
//! CREATE TABLE messages (
//!     id                UUID PRIMARY KEY,
//!     channel           TEXT NOT NULL,
//!     recipient         TEXT NOT NULL,
//!     body              TEXT NOT NULL,
//!     subject           TEXT,
//!     status            TEXT NOT NULL,
//!     provider          TEXT,
//!     external_id       TEXT,
//!     retry_count       INTEGER NOT NULL DEFAULT 0,
//!     error_message     TEXT,
//!     cost              DOUBLE PRECISION,
//!     webhook_url       TEXT,
//!     metadata          JSONB NOT NULL DEFAULT '{}'::jsonb,
//!     created_at        TIMESTAMPTZ NOT NULL,
//!     updated_at        TIMESTAMPTZ NOT NULL,
//!     sent_at           TIMESTAMPTZ,
//!     delivered_at      TIMESTAMPTZ,
//!     failed_at         TIMESTAMPTZ,
//!     cancelled_at      TIMESTAMPTZ,
//!     webhook_delivered BOOLEAN NOT NULL DEFAULT FALSE,
//!     webhook_attempts  INTEGER NOT NULL DEFAULT 0,
//!     webhook_error     TEXT,
//!     webhook_failed_at TIMESTAMPTZ
//! );
//! CREATE INDEX messages_provider_external_id ON messages (provider, external_id);
//! ```
//!
//! Status transitions are a single conditional `UPDATE ... WHERE status = ANY(..)`,
//! so the check-then-write is atomic at row level.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{MessageStore, StoreError};
use crate::error::{GatewayError, Result};
use crate::models::{Message, MessageUpdate, Metadata, NewMessage};
use crate::state_machine::MessageStatus;
use crate::utils::{SharedClock, SystemClock};

const UPDATE_SQL: &str = r#"
UPDATE messages SET
    status            = COALESCE($2, status),
    provider          = COALESCE($3, provider),
    external_id       = COALESCE($4, external_id),
    retry_count       = GREATEST(retry_count, COALESCE($5, retry_count)),
    error_message     = COALESCE($6, error_message),
    cost              = COALESCE($7, cost),
    metadata          = metadata || COALESCE($8, '{}'::jsonb),
    sent_at           = COALESCE($9, sent_at),
    delivered_at      = COALESCE($10, delivered_at),
    failed_at         = COALESCE($11, failed_at),
    cancelled_at      = COALESCE($12, cancelled_at),
    webhook_delivered = COALESCE($13, webhook_delivered),
    webhook_attempts  = GREATEST(webhook_attempts, COALESCE($14, webhook_attempts)),
    webhook_error     = COALESCE($15, webhook_error),
    webhook_failed_at = COALESCE($16, webhook_failed_at),
    updated_at        = $18
WHERE id = $1
  AND ($17::text[] IS NULL OR status = ANY($17))
RETURNING *
"#;

/// Row shape of the `messages` table
#[derive(Debug, Clone, FromRow)]
struct MessageRow {
    id: Uuid,
    channel: String,
    recipient: String,
    body: String,
    subject: Option<String>,
    status: String,
    provider: Option<String>,
    external_id: Option<String>,
    retry_count: i32,
    error_message: Option<String>,
    cost: Option<f64>,
    webhook_url: Option<String>,
    metadata: Json<Metadata>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    webhook_delivered: bool,
    webhook_attempts: i32,
    webhook_error: Option<String>,
    webhook_failed_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageRow> for Message {
    type Error = GatewayError;

    fn try_from(row: MessageRow) -> Result<Self> {
        let status = row.status.parse::<MessageStatus>().map_err(|e| {
            StoreError::Persistence(format!("message {} has {e}", row.id))
        })?;
        Ok(Message {
            id: row.id,
            channel: row.channel.parse()?,
            recipient: row.recipient,
            body: row.body,
            subject: row.subject,
            status,
            provider: row.provider,
            external_id: row.external_id,
            retry_count: u32::try_from(row.retry_count).unwrap_or_default(),
            error_message: row.error_message,
            cost: row.cost,
            webhook_url: row.webhook_url,
            metadata: row.metadata.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sent_at: row.sent_at,
            delivered_at: row.delivered_at,
            failed_at: row.failed_at,
            cancelled_at: row.cancelled_at,
            webhook_delivered: row.webhook_delivered,
            webhook_attempts: u32::try_from(row.webhook_attempts).unwrap_or_default(),
            webhook_error: row.webhook_error,
            webhook_failed_at: row.webhook_failed_at,
        })
    }
}

fn db_error(error: sqlx::Error) -> GatewayError {
    GatewayError::Store(StoreError::Persistence(error.to_string()))
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Message store over a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgMessageStore {
    pool: PgPool,
    clock: SharedClock,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, SystemClock::shared())
    }

    /// Stamp `created_at` and `updated_at` from `clock` instead of the wall clock
    pub fn with_clock(pool: PgPool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }

    fn prepare(&self, message: NewMessage, status: MessageStatus) -> Message {
        Message::from_new(message, status, self.clock.now())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn execute_update(
        &self,
        id: Uuid,
        status: Option<MessageStatus>,
        allowed_sources: Option<Vec<String>>,
        update: &MessageUpdate,
    ) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(UPDATE_SQL)
            .bind(id)
            .bind(status.map(|s| s.as_str()))
            .bind(update.provider.as_deref())
            .bind(update.external_id.as_deref())
            .bind(update.retry_count.map(to_i32))
            .bind(update.error_message.as_deref())
            .bind(update.cost)
            .bind(update.metadata.as_ref().map(Json))
            .bind(update.sent_at)
            .bind(update.delivered_at)
            .bind(update.failed_at)
            .bind(update.cancelled_at)
            .bind(update.webhook_delivered)
            .bind(update.webhook_attempts.map(to_i32))
            .bind(update.webhook_error.as_deref())
            .bind(update.webhook_failed_at)
            .bind(allowed_sources)
            .bind(self.clock.now())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(Message::try_from).transpose()
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn create(&self, message: NewMessage, status: MessageStatus) -> Result<Message> {
        let message = self.prepare(message, status);
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (
                id, channel, recipient, body, subject, status, retry_count,
                webhook_url, metadata, created_at, updated_at,
                webhook_delivered, webhook_attempts
            )
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8, $9, $9, FALSE, 0)
            RETURNING *
            "#,
        )
        .bind(message.id)
        .bind(message.channel.as_str())
        .bind(&message.recipient)
        .bind(&message.body)
        .bind(message.subject.as_deref())
        .bind(message.status.as_str())
        .bind(message.webhook_url.as_deref())
        .bind(Json(&message.metadata))
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Message::try_from(row)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Message>> {
        sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(Message::try_from)
            .transpose()
    }

    async fn find_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<Message>> {
        sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages WHERE provider = $1 AND external_id = $2 LIMIT 1",
        )
        .bind(provider)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(Message::try_from)
        .transpose()
    }

    async fn update(&self, id: Uuid, update: MessageUpdate) -> Result<Message> {
        self.execute_update(id, None, None, &update)
            .await?
            .ok_or(GatewayError::MessageNotFound(id))
    }

    async fn transition(
        &self,
        id: Uuid,
        target: MessageStatus,
        update: MessageUpdate,
    ) -> Result<Message> {
        let sources: Vec<String> = MessageStatus::allowed_sources(target)
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect();

        if let Some(message) = self
            .execute_update(id, Some(target), Some(sources), &update)
            .await?
        {
            return Ok(message);
        }

        match self.find(id).await? {
            None => Err(GatewayError::MessageNotFound(id)),
            Some(current) => {
                tracing::warn!(
                    message_id = %id,
                    from = %current.status,
                    to = %target,
                    "⚠️ Rejected message status transition"
                );
                Err(GatewayError::InvalidTransition {
                    from: current.status,
                    to: target,
                })
            }
        }
    }
}

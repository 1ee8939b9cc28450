use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::models::{Message, WebhookEvent};

fn timestamp(at: Option<DateTime<Utc>>) -> Value {
    at.map(|t| Value::String(t.to_rfc3339())).unwrap_or(Value::Null)
}

/// Unsigned payload describing `message` for `event`
pub fn build_payload(
    message: &Message,
    event: WebhookEvent,
    data: &Value,
    now: DateTime<Utc>,
) -> Value {
    json!({
        "event": event.qualified_name(),
        "message_id": message.id.to_string(),
        "external_id": message.external_id,
        "channel": message.channel.as_str(),
        "recipient": message.recipient,
        "status": message.status.as_str(),
        "provider": message.provider,
        "timestamps": {
            "created_at": timestamp(Some(message.created_at)),
            "sent_at": timestamp(message.sent_at),
            "delivered_at": timestamp(message.delivered_at),
            "failed_at": timestamp(message.failed_at),
        },
        "metadata": message.metadata,
        "data": data,
        "timestamp": now.to_rfc3339(),
    })
}

/// Event data of a `failed` event
pub fn failed_data(error: &str, retry_count: u32) -> Value {
    json!({
        "error": error,
        "retry_count": retry_count,
    })
}

/// Event data of a `delivered` event; duration is measured from `sent_at`
pub fn delivered_data(message: &Message) -> Value {
    let duration = match (message.sent_at, message.delivered_at) {
        (Some(sent), Some(delivered)) => json!((delivered - sent).num_seconds().max(0)),
        _ => Value::Null,
    };
    json!({ "delivery_duration_seconds": duration })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SendRequest;
    use crate::state_machine::MessageStatus;

    fn message() -> Message {
        let new = SendRequest::new("sms", "+255712345678", "hello")
            .with_metadata("order_id", json!(42))
            .validate()
            .unwrap();
        Message::from_new(new, MessageStatus::Sent, Utc::now())
    }

    #[test]
    fn test_payload_fields() {
        let mut message = message();
        message.provider = Some("beem".to_string());
        message.external_id = Some("ext-9".to_string());

        let payload = build_payload(
            &message,
            WebhookEvent::Failed,
            &failed_data("timeout", 3),
            Utc::now(),
        );

        assert_eq!(payload["event"], "message.failed");
        assert_eq!(payload["message_id"], message.id.to_string());
        assert_eq!(payload["external_id"], "ext-9");
        assert_eq!(payload["channel"], "sms");
        assert_eq!(payload["status"], "sent");
        assert_eq!(payload["provider"], "beem");
        assert_eq!(payload["metadata"]["order_id"], 42);
        assert_eq!(payload["data"]["retry_count"], 3);
        assert!(payload["timestamps"]["delivered_at"].is_null());
    }

    #[test]
    fn test_delivery_duration() {
        let mut message = message();
        let sent = Utc::now();
        message.sent_at = Some(sent);
        message.delivered_at = Some(sent + chrono::Duration::seconds(12));
        assert_eq!(delivered_data(&message)["delivery_duration_seconds"], 12);
    }
}

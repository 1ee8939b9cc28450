//! Signed webhook payloads as a receiving client sees them

mod support;

use notify_gateway::constants::webhook::{HEADER_EVENT, HEADER_SIGNATURE};
use notify_gateway::models::SendRequest;
use notify_gateway::test_helpers::{sms_providers, ScriptedAdapter, TestGateway};
use notify_gateway::webhook::{sign_payload, verify_payload, verify_signature, WebhookRequest};
use proptest::prelude::*;
use serde_json::{json, Value};

const SECRET: &[u8] = TestGateway::WEBHOOK_SECRET.as_bytes();

fn header<'a>(request: &'a WebhookRequest, name: &str) -> Option<&'a str> {
    request
        .headers
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

async fn sent_webhook() -> (WebhookRequest, Value) {
    support::init_tracing();
    let gateway = TestGateway::new(sms_providers(&[("beem", 90)]));
    gateway.register(ScriptedAdapter::succeeding("beem"));

    gateway
        .orchestrator
        .queue(
            SendRequest::new("sms", "+255712345678", "Your code is 4821")
                .with_webhook_url("https://client.test/hooks/notify"),
        )
        .await
        .unwrap();
    gateway.run_queued().await;

    let requests = gateway.webhooks.requests();
    assert_eq!(requests.len(), 1, "one webhook posted");
    let request = requests.into_iter().next().unwrap();
    let payload: Value = serde_json::from_slice(&request.body).unwrap();
    (request, payload)
}

#[tokio::test]
async fn test_posted_payload_verifies_with_shared_secret() {
    let (request, payload) = sent_webhook().await;

    assert_eq!(request.url, "https://client.test/hooks/notify");
    assert_eq!(header(&request, HEADER_EVENT), Some("message.sent"));
    assert_eq!(payload["event"], json!("message.sent"));
    assert_eq!(payload["status"], json!("sent"));
    assert_eq!(payload["provider"], json!("beem"));

    let signature = header(&request, HEADER_SIGNATURE).unwrap();
    assert_eq!(payload["signature"], json!(signature));
    assert!(verify_payload(SECRET, &payload));
    assert!(verify_signature(SECRET, &payload, signature));
    assert!(!verify_payload(b"not-the-client-secret", &payload));
}

#[tokio::test]
async fn test_changing_any_field_breaks_the_signature() {
    let (_, payload) = sent_webhook().await;
    let fields: Vec<String> = payload
        .as_object()
        .unwrap()
        .keys()
        .filter(|key| key.as_str() != "signature")
        .cloned()
        .collect();
    assert!(fields.len() >= 8);

    for field in fields {
        let mut tampered = payload.clone();
        tampered[field.as_str()] = json!("tampered");
        assert!(
            !verify_payload(SECRET, &tampered),
            "changing {field} must invalidate the signature"
        );
    }
}

#[tokio::test]
async fn test_resigning_reproduces_the_posted_signature() {
    let (request, payload) = sent_webhook().await;
    assert_eq!(
        sign_payload(SECRET, &payload).unwrap(),
        header(&request, HEADER_SIGNATURE).unwrap()
    );
}

proptest! {
    #[test]
    fn signature_depends_on_every_value(message_id in "[a-f0-9]{8}", status in "[a-z]{3,10}") {
        let payload = json!({"event": "message.sent", "message_id": message_id, "status": status});
        let signature = sign_payload(SECRET, &payload).unwrap();
        prop_assert!(verify_signature(SECRET, &payload, &signature));
        prop_assert_eq!(&signature, &sign_payload(SECRET, &payload).unwrap());

        let mut changed = payload.clone();
        changed["status"] = json!(format!("{status}x"));
        prop_assert!(!verify_signature(SECRET, &changed, &signature));
    }
}

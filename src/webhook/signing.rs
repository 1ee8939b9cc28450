//! HMAC-SHA256 payload signatures.
//!
//! The signature covers the compact JSON encoding of the payload with the
//! `signature` field removed. Object keys serialize in sorted order, so the
//! encoding is canonical for a given payload.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::constants::webhook::{SIGNATURE_FIELD, SIGNATURE_PREFIX};
use crate::error::{GatewayError, Result};

type HmacSha256 = Hmac<Sha256>;

fn canonical_bytes(payload: &Value) -> Result<Vec<u8>> {
    let mut unsigned = payload.clone();
    if let Value::Object(map) = &mut unsigned {
        map.remove(SIGNATURE_FIELD);
    }
    serde_json::to_vec(&unsigned)
        .map_err(|e| GatewayError::Webhook(format!("Failed to encode payload: {e}")))
}

fn mac(secret: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret)
        .map_err(|e| GatewayError::Webhook(format!("Invalid signing secret: {e}")))
}

/// `sha256=<hex>` signature of `payload`, ignoring any existing signature field
pub fn sign_payload(secret: &[u8], payload: &Value) -> Result<String> {
    let mut mac = mac(secret)?;
    mac.update(&canonical_bytes(payload)?);
    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Sign `payload` and store the signature inside it
pub fn attach_signature(secret: &[u8], payload: &mut Value) -> Result<String> {
    let signature = sign_payload(secret, payload)?;
    match payload {
        Value::Object(map) => {
            map.insert(SIGNATURE_FIELD.to_string(), Value::String(signature.clone()));
            Ok(signature)
        }
        _ => Err(GatewayError::Webhook(
            "Webhook payload must be a JSON object".to_string(),
        )),
    }
}

/// Verify `signature` (with or without the `sha256=` prefix) in constant time
pub fn verify_signature(secret: &[u8], payload: &Value, signature: &str) -> bool {
    let hex_part = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };
    let (Ok(mut mac), Ok(bytes)) = (mac(secret), canonical_bytes(payload)) else {
        return false;
    };
    mac.update(&bytes);
    mac.verify_slice(&expected).is_ok()
}

/// Verify the signature embedded in a received payload
pub fn verify_payload(secret: &[u8], payload: &Value) -> bool {
    payload
        .get(SIGNATURE_FIELD)
        .and_then(Value::as_str)
        .is_some_and(|signature| verify_signature(secret, payload, signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &[u8] = b"a-long-enough-signing-secret";

    #[test]
    fn test_signature_is_deterministic() {
        let payload = json!({"event": "message.sent", "message_id": "abc"});
        let first = sign_payload(SECRET, &payload).unwrap();
        let second = sign_payload(SECRET, &payload).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("sha256="));
        assert_eq!(first.len(), "sha256=".len() + 64);
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(sign_payload(SECRET, &a).unwrap(), sign_payload(SECRET, &b).unwrap());
    }

    #[test]
    fn test_signature_field_is_excluded() {
        let mut payload = json!({"event": "message.failed", "data": {"error": "timeout"}});
        let signature = attach_signature(SECRET, &mut payload).unwrap();
        assert_eq!(payload["signature"], json!(signature));
        assert_eq!(sign_payload(SECRET, &payload).unwrap(), signature);
        assert!(verify_payload(SECRET, &payload));
    }

    #[test]
    fn test_tampering_invalidates_signature() {
        let mut payload = json!({"event": "message.sent", "status": "sent"});
        attach_signature(SECRET, &mut payload).unwrap();

        payload["status"] = json!("delivered");
        assert!(!verify_payload(SECRET, &payload));
        assert!(!verify_payload(b"another-secret-value", &payload));
    }

    #[test]
    fn test_garbage_signature_is_rejected() {
        let payload = json!({"event": "message.sent"});
        assert!(!verify_signature(SECRET, &payload, "sha256=zz"));
        assert!(!verify_payload(SECRET, &payload));
    }
}

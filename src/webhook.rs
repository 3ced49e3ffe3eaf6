//! Inbound webhook verification and event dispatch.

use crate::fingerprint::canonical_json;
use crate::{Error, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded HMAC-SHA256 of the payload.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Fields probed, in order, for the event type of a payload.
const EVENT_TYPE_FIELDS: [&str; 3] = ["event", "type", "event_type"];

/// Handles one webhook event type.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(&self, payload: &Value) -> Result<Value>;
}

/// Verifies webhook signatures and dispatches payloads to registered
/// handlers, one handler per event type.
///
/// Without a configured secret, signature verification always passes.
/// This is an explicit, insecure default for development setups; deploy
/// production receivers with a secret.
pub struct WebhookProcessor {
    secret: Option<String>,
    handlers: RwLock<HashMap<String, Arc<dyn WebhookHandler>>>,
}

impl WebhookProcessor {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register the handler for `event_type`. A later registration for
    /// the same type replaces the earlier one.
    pub fn register_handler(&self, event_type: impl Into<String>, handler: Arc<dyn WebhookHandler>) {
        let event_type = event_type.into();
        debug!(%event_type, "webhook handler registered");
        self.handlers
            .write()
            .expect("handler lock poisoned")
            .insert(event_type, handler);
    }

    /// Constant-time verification of a hex HMAC-SHA256 signature over
    /// `payload`. Always true when no secret is configured (see the type
    /// docs for the security implications).
    pub fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        let Some(secret) = &self.secret else {
            return true;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(payload);
        match hex::decode(signature.trim()) {
            // verify_slice compares in constant time
            Ok(raw) => mac.verify_slice(&raw).is_ok(),
            Err(_) => false,
        }
    }

    /// Verify (when both a secret and a signature header are present),
    /// extract the event type, and dispatch to the registered handler.
    ///
    /// The payload is canonicalized to key-sorted JSON bytes before the
    /// HMAC check; the sender must sign the same canonical form. Returns
    /// the handler result, or an explicit `{"status": "ignored"}` value
    /// when no handler is registered for the event type.
    pub async fn process_webhook(
        &self,
        payload: &Value,
        headers: &HashMap<String, String>,
    ) -> Result<Value> {
        if self.secret.is_some() {
            if let Some(signature) = header_value(headers, SIGNATURE_HEADER) {
                let canonical = canonical_json(payload);
                if !self.verify_signature(canonical.as_bytes(), signature) {
                    return Err(Error::Validation("invalid webhook signature".to_string()));
                }
            }
        }

        let event_type = EVENT_TYPE_FIELDS
            .iter()
            .find_map(|field| payload.get(field).and_then(Value::as_str))
            .ok_or_else(|| Error::Validation("webhook payload has no event type".to_string()))?;

        let handler = self
            .handlers
            .read()
            .expect("handler lock poisoned")
            .get(event_type)
            .cloned();
        match handler {
            Some(handler) => {
                info!(event_type, "dispatching webhook");
                handler.handle(payload).await
            }
            None => {
                warn!(event_type, "no handler registered for webhook event");
                Ok(json!({
                    "status": "ignored",
                    "reason": format!("no handler for event type: {event_type}"),
                }))
            }
        }
    }
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl WebhookHandler for Echo {
        async fn handle(&self, payload: &Value) -> Result<Value> {
            Ok(json!({"status": "ok", "echo": payload.clone()}))
        }
    }

    fn sign(secret: &str, payload: &Value) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(canonical_json(payload).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_verifies_and_tampered_fails() {
        let processor = WebhookProcessor::new(Some("s3cret".to_string()));
        let payload = json!({"event": "payment.completed", "amount": 100});
        let canonical = canonical_json(&payload);
        let signature = sign("s3cret", &payload);

        assert!(processor.verify_signature(canonical.as_bytes(), &signature));
        let mut tampered = signature.clone();
        tampered.replace_range(0..2, if &signature[0..2] == "00" { "11" } else { "00" });
        assert!(!processor.verify_signature(canonical.as_bytes(), &tampered));
        assert!(!processor.verify_signature(canonical.as_bytes(), "not-hex"));
    }

    #[test]
    fn missing_secret_accepts_any_signature() {
        let processor = WebhookProcessor::new(None);
        assert!(processor.verify_signature(b"anything", "bogus"));
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let processor = WebhookProcessor::new(None);
        processor.register_handler("payment.completed", Arc::new(Echo));
        let payload = json!({"event": "payment.completed", "amount": 100});
        let result = processor.process_webhook(&payload, &HashMap::new()).await.unwrap();
        assert_eq!(result["status"], "ok");
    }

    #[tokio::test]
    async fn last_registration_wins() {
        struct Nope;
        #[async_trait]
        impl WebhookHandler for Nope {
            async fn handle(&self, _: &Value) -> Result<Value> {
                Ok(json!({"status": "nope"}))
            }
        }
        let processor = WebhookProcessor::new(None);
        processor.register_handler("e", Arc::new(Nope));
        processor.register_handler("e", Arc::new(Echo));
        let result = processor
            .process_webhook(&json!({"event": "e"}), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(result["status"], "ok");
    }

    #[tokio::test]
    async fn unregistered_event_is_ignored_not_an_error() {
        let processor = WebhookProcessor::new(None);
        let result = processor
            .process_webhook(&json!({"type": "unknown.event"}), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(result["status"], "ignored");
        assert!(result["reason"].as_str().unwrap().contains("unknown.event"));
    }

    #[tokio::test]
    async fn event_type_falls_back_through_fields() {
        let processor = WebhookProcessor::new(None);
        processor.register_handler("tick", Arc::new(Echo));
        for payload in [
            json!({"event": "tick"}),
            json!({"type": "tick"}),
            json!({"event_type": "tick"}),
        ] {
            let result = processor.process_webhook(&payload, &HashMap::new()).await.unwrap();
            assert_eq!(result["status"], "ok");
        }
    }

    #[tokio::test]
    async fn missing_event_type_is_a_validation_error() {
        let processor = WebhookProcessor::new(None);
        let err = processor
            .process_webhook(&json!({"data": 1}), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn bad_signature_with_secret_is_rejected() {
        let processor = WebhookProcessor::new(Some("s3cret".to_string()));
        processor.register_handler("tick", Arc::new(Echo));
        let payload = json!({"event": "tick"});

        let mut headers = HashMap::new();
        headers.insert(SIGNATURE_HEADER.to_string(), "deadbeef".to_string());
        let err = processor.process_webhook(&payload, &headers).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // correct signature passes end to end, case-insensitive header
        let mut headers = HashMap::new();
        headers.insert("x-webhook-signature".to_string(), sign("s3cret", &payload));
        let result = processor.process_webhook(&payload, &headers).await.unwrap();
        assert_eq!(result["status"], "ok");
    }
}

//! Request fingerprinting: deterministic cache-key derivation.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Namespace tag prefixed to every fingerprint so keys from this runtime
/// are recognizable inside a shared cache store.
pub const KEY_PREFIX: &str = "api:";

/// Separator between the fingerprint input segments. Unambiguous because
/// it cannot appear inside canonical JSON unescaped.
const SEPARATOR: &str = "||";

/// Deterministic hash-based cache key derived from request shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the fingerprint of a request.
///
/// Pure function of `(method, url, params, body)`: params and body are
/// serialized with recursively sorted object keys, so logically identical
/// requests fingerprint identically regardless of field ordering, and any
/// field change produces a different digest with overwhelming probability.
pub fn fingerprint(
    method: &str,
    url: &str,
    params: Option<&Value>,
    body: Option<&Value>,
) -> Fingerprint {
    let mut parts: Vec<String> = vec![method.to_uppercase(), url.to_string()];
    if let Some(p) = params {
        parts.push(canonical_json(p));
    }
    if let Some(b) = body {
        parts.push(canonical_json(b));
    }

    let mut hasher = Sha256::new();
    hasher.update(parts.join(SEPARATOR).as_bytes());
    let hash: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();

    Fingerprint(format!("{KEY_PREFIX}{hash}"))
}

/// Serialize a JSON value with object keys recursively sorted.
///
/// Also used by the webhook verifier so that signer and verifier agree on
/// one canonical byte representation.
pub(crate) fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys are plain strings; Value::String gives proper escaping.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

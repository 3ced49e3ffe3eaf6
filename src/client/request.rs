//! Immutable per-call request descriptor.

use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Describes one API call: method, path relative to the client base URL,
/// query params and JSON body as dynamic values, per-call headers, and the
/// caching knobs. Built once, then handed to
/// [`ApiClient::execute`](crate::ApiClient::execute).
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub params: Option<Value>,
    pub body: Option<Value>,
    pub headers: HashMap<String, String>,
    pub cacheable: bool,
    pub ttl_override: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            ..Self::default()
        }
    }

    /// GET requests are cacheable by default.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            cacheable: true,
            ..Self::new(Method::GET, path)
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Query parameters as a JSON object; non-string scalars are
    /// stringified when the URL is built.
    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Per-call header; wins over the client default on conflict.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl_override = Some(ttl);
        self
    }

    /// Cancellation token propagated into backoff sleeps and the network
    /// call itself.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Query pairs ready for the transport: string values pass through,
    /// other scalars are serialized compactly.
    pub(crate) fn query_pairs(&self) -> Vec<(String, String)> {
        match &self.params {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), scalar_to_string(v)))
                .collect(),
            _ => Vec::new(),
        }
    }
}

pub(crate) fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

//! # Core Client
//!
//! [`ApiClient`] owns the pooled HTTP session and executes requests with
//! deterministic caching, bounded retry, response classification, and
//! per-endpoint metrics. It is the single entry point every external
//! integration (market data, payments, webhooks) builds on.
//!
//! Control flow per call:
//! caller → [`ApiClient::execute`] → cache lookup → session → transport →
//! classification → cache write → caller. The auth extension in
//! [`crate::auth`] decorates `execute` with token management.

mod request;
mod transfer;

pub use request::Request;
pub use transfer::PaginateOptions;

use crate::cache::{CacheStore, MemoryCache};
use crate::config::ConfigSource;
use crate::fingerprint::fingerprint;
use crate::metrics::MetricsCollector;
use crate::retry::RetryPolicy;
use crate::{Error, Result};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// Seconds to wait after a 429 when the `Retry-After` header is absent or
/// malformed.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Resilient async HTTP client shared by one integration.
///
/// The underlying connection pool is created lazily on first use and can
/// be dropped with [`close_session`](Self::close_session); a later call
/// recreates it. Cache store and metrics collector are injected, shared
/// collaborators.
pub struct ApiClient {
    base_url: String,
    timeout: Duration,
    default_headers: RwLock<HashMap<String, String>>,
    session: RwLock<Option<reqwest::Client>>,
    cache: Arc<dyn CacheStore>,
    cache_ttl: Duration,
    retry: RetryPolicy,
    metrics: Arc<MetricsCollector>,
}

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    headers: HashMap<String, String>,
    cache: Option<Arc<dyn CacheStore>>,
    cache_ttl: Duration,
    retry: RetryPolicy,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ApiClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            headers: HashMap::new(),
            cache: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            retry: RetryPolicy::default(),
            metrics: None,
        }
    }

    /// Static vendor API key, injected as a default
    /// `Authorization: Bearer` header.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Additional default header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Shared cache store. Defaults to a process-local [`MemoryCache`].
    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Shared metrics collector. Defaults to a fresh one per client.
    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Hydrate settings from a typed config source. Recognized keys:
    /// `api_key`, `timeout_secs`, `cache_ttl_secs`, `max_retries`,
    /// `retry_initial_delay_ms`.
    pub fn with_config(mut self, config: &dyn ConfigSource) -> Self {
        if let Some(key) = config.get_str("api_key") {
            self.api_key = Some(key);
        }
        if let Some(secs) = config.get_int("timeout_secs") {
            self.timeout = Duration::from_secs(secs.max(0) as u64);
        }
        if let Some(secs) = config.get_int("cache_ttl_secs") {
            self.cache_ttl = Duration::from_secs(secs.max(0) as u64);
        }
        if let Some(n) = config.get_int("max_retries") {
            self.retry.max_retries = n.max(0) as u32;
        }
        if let Some(ms) = config.get_int("retry_initial_delay_ms") {
            self.retry.initial_delay = Duration::from_millis(ms.max(0) as u64);
        }
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        url::Url::parse(&self.base_url)
            .map_err(|e| Error::Validation(format!("invalid base URL {:?}: {e}", self.base_url)))?;

        let mut headers = HashMap::new();
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers.insert(
            "User-Agent".to_string(),
            concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        );
        if let Some(key) = &self.api_key {
            headers.insert("Authorization".to_string(), format!("Bearer {key}"));
        }
        headers.extend(self.headers);

        let base_url = self.base_url.trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "API client created");

        Ok(ApiClient {
            base_url,
            timeout: self.timeout,
            default_headers: RwLock::new(headers),
            session: RwLock::new(None),
            cache: self.cache.unwrap_or_else(|| Arc::new(MemoryCache::default())),
            cache_ttl: self.cache_ttl,
            retry: self.retry,
            metrics: self.metrics.unwrap_or_default(),
        })
    }
}

impl ApiClient {
    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url)
    }

    /// Execute one request: cache lookup, transport with bounded retry,
    /// classification, cache write, and a single metrics record after the
    /// outcome is final.
    pub async fn execute(&self, req: &Request) -> Result<Value> {
        let started = Instant::now();
        let result = self.execute_inner(req).await;
        self.metrics.record(
            &req.path,
            req.method.as_str(),
            started.elapsed(),
            result.is_ok(),
            result.as_ref().err().and_then(Error::status),
        );
        result
    }

    // Also driven by the auth extension, which wraps it with token
    // management and does its own single metrics record.
    pub(crate) async fn execute_inner(&self, req: &Request) -> Result<Value> {
        let url = self.url(&req.path);
        let headers = self.merged_headers(&req.headers);

        // Cache is consulted and written only for cacheable GETs.
        let cache_key = if req.cacheable && req.method == Method::GET {
            let key = fingerprint("GET", &url, req.params.as_ref(), req.body.as_ref());
            if let Some(hit) = self.cache.get(&key).await {
                debug!(url = %url, "returning cached response");
                return Ok(hit);
            }
            Some(key)
        } else {
            None
        };

        let value = self
            .retry
            .run(req.cancel.as_ref(), || self.send_once(req, &url, &headers))
            .await?;

        if let Some(key) = cache_key {
            let ttl = req.ttl_override.unwrap_or(self.cache_ttl);
            self.cache.set(&key, value.clone(), ttl).await;
            debug!(url = %url, ttl_secs = ttl.as_secs(), "response cached");
        }
        Ok(value)
    }

    async fn send_once(
        &self,
        req: &Request,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Value> {
        let client = self.session()?;
        let mut builder = client.request(req.method.clone(), url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        let pairs = req.query_pairs();
        if !pairs.is_empty() {
            builder = builder.query(&pairs);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        debug!(method = %req.method, url = %url, "sending request");
        let response = builder.send().await?;
        classify_response(response).await
    }

    /// GET with optional query params; cacheable by default.
    pub async fn get(&self, endpoint: &str, params: Option<Value>) -> Result<Value> {
        let mut req = Request::get(endpoint);
        req.params = params;
        self.execute(&req).await
    }

    /// POST with an optional JSON body; never cached.
    pub async fn post(&self, endpoint: &str, body: Option<Value>) -> Result<Value> {
        let mut req = Request::post(endpoint);
        req.body = body;
        self.execute(&req).await
    }

    pub async fn put(&self, endpoint: &str, body: Option<Value>) -> Result<Value> {
        let mut req = Request::put(endpoint);
        req.body = body;
        self.execute(&req).await
    }

    pub async fn delete(&self, endpoint: &str, params: Option<Value>) -> Result<Value> {
        let mut req = Request::delete(endpoint);
        req.params = params;
        self.execute(&req).await
    }

    /// Drop the fingerprint for a GET on `endpoint` with `params`.
    ///
    /// The no-argument form (`endpoint == None`) clears the **entire**
    /// shared cache store, not a per-client namespace; other clients
    /// sharing the store lose their entries too.
    pub async fn clear_cache(&self, endpoint: Option<&str>, params: Option<&Value>) {
        match endpoint {
            Some(endpoint) => {
                let url = self.url(endpoint);
                let key = fingerprint("GET", &url, params, None);
                self.cache.delete(&key).await;
                debug!(url = %url, "cache entry cleared");
            }
            None => {
                self.cache.clear().await;
                debug!("entire shared cache store cleared");
            }
        }
    }

    /// Drop the pooled session. Safe to call repeatedly; the next request
    /// creates a fresh pool.
    pub fn close_session(&self) {
        let mut guard = self.session.write().expect("session lock poisoned");
        if guard.take().is_some() {
            debug!("HTTP session closed");
        }
    }

    /// Lazily create or reuse the pooled transport. Concurrent first use
    /// is serialized by the lock, so exactly one pool is built.
    pub(crate) fn session(&self) -> Result<reqwest::Client> {
        if let Some(client) = self.session.read().expect("session lock poisoned").as_ref() {
            return Ok(client.clone());
        }
        let mut guard = self.session.write().expect("session lock poisoned");
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()?;
        debug!("new HTTP session created");
        *guard = Some(client.clone());
        Ok(client)
    }

    /// Default headers merged with per-call headers; per-call wins.
    pub(crate) fn merged_headers(&self, extra: &HashMap<String, String>) -> HashMap<String, String> {
        let mut merged = self
            .default_headers
            .read()
            .expect("header lock poisoned")
            .clone();
        merged.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    pub(crate) fn set_default_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.default_headers
            .write()
            .expect("header lock poisoned")
            .insert(name.into(), value.into());
    }

    pub(crate) fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    pub(crate) fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn record_call(
        &self,
        endpoint: &str,
        method: &str,
        started: Instant,
        result: &Result<impl Sized>,
    ) {
        self.metrics.record(
            endpoint,
            method,
            started.elapsed(),
            result.is_ok(),
            result.as_ref().err().and_then(Error::status),
        );
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    pub fn cache(&self) -> Arc<dyn CacheStore> {
        Arc::clone(&self.cache)
    }
}

/// Decode the response body and map the status onto the error taxonomy.
///
/// Bodies that fail JSON decoding degrade to `{"text": rawBody}` rather
/// than erroring, for both success and failure paths.
pub(crate) async fn classify_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let text = response.text().await?;
    let body: Value = serde_json::from_str(&text).unwrap_or_else(|_| json!({ "text": text }));
    classify_status(status, retry_after, body)
}

pub(crate) fn classify_status(status: StatusCode, retry_after_secs: u64, body: Value) -> Result<Value> {
    if status.is_success() {
        return Ok(body);
    }
    let code = status.as_u16();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Auth {
            message: error_message(&body),
            status: Some(code),
            body: Some(body),
        }),
        StatusCode::TOO_MANY_REQUESTS => Err(Error::RateLimited {
            message: "request rate limit exceeded".to_string(),
            retry_after_secs,
            status: Some(code),
            body: Some(body),
        }),
        _ => Err(Error::Api {
            message: format!("HTTP {code}: {}", error_message(&body)),
            status: Some(code),
            body: Some(body),
        }),
    }
}

/// Turn a non-2xx response into its classified error, consuming the body.
/// A body read failure degrades to a transient transport error.
pub(crate) async fn failure_from(response: reqwest::Response) -> Error {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => return Error::Transport(e),
    };
    let body: Value = serde_json::from_str(&text).unwrap_or_else(|_| json!({ "text": text }));
    match classify_status(status, retry_after, body) {
        Err(e) => e,
        Ok(_) => Error::api(format!("unexpected status {status}")),
    }
}

pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

fn error_message(body: &Value) -> String {
    body.get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string()
}

//! # api-runtime
//!
//! Resilient async HTTP client runtime shared by every external
//! integration in the system: market-data providers, payment gateways,
//! and inbound webhook receivers.
//!
//! ## Overview
//!
//! One [`ApiClient`] per upstream service bundles the concerns every
//! integration otherwise reimplements: a pooled session with lazy
//! creation, deterministic response caching for cacheable GETs, bounded
//! exponential-backoff retry for transient transport failures, a closed
//! error taxonomy, and per-endpoint metrics. [`AuthClient`] layers
//! OAuth2-style token acquisition and transparent refresh on top, and
//! [`WebhookProcessor`] covers the inbound direction with signature
//! verification and event dispatch.
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Core client: execute, get/post/put/delete, upload, download, paginate, stream |
//! | [`auth`] | Token-based auth extension wrapping the core client |
//! | [`retry`] | Bounded exponential-backoff retry policy |
//! | [`cache`] | Cache store trait and in-memory backend |
//! | [`fingerprint`] | Deterministic request fingerprinting for cache keys |
//! | [`metrics`] | Per-endpoint and global request statistics |
//! | [`webhook`] | Webhook signature verification and dispatch |
//! | [`config`] | Typed configuration source collaborator |
//! | [`error`] | Error taxonomy |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use api_runtime::{ApiClient, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = ApiClient::builder("https://api.example.com")
//!         .api_key("vendor-key")
//!         .build()?;
//!
//!     // Cached on success; an identical repeat within the TTL
//!     // performs no network I/O.
//!     let ticker = client
//!         .get("/v1/ticker", Some(json!({"symbol": "BTCUSDT"})))
//!         .await?;
//!     println!("{ticker}");
//!     Ok(())
//! }
//! ```
//!
//! Responses are decoded [`serde_json::Value`]s at this boundary;
//! collaborators are expected to parse them into their own strongly
//! typed models rather than passing untyped maps deeper in.

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod retry;
pub mod webhook;

pub use auth::{AuthClient, Credentials, GrantKind, TokenStatus};
pub use cache::{CacheStore, MemoryCache, NullCache};
pub use client::{ApiClient, ApiClientBuilder, PaginateOptions, Request};
pub use config::{ConfigSource, EnvConfig, MapConfig};
pub use error::Error;
pub use fingerprint::{fingerprint, Fingerprint};
pub use metrics::{MetricsCollector, Statistics};
pub use retry::RetryPolicy;
pub use webhook::{WebhookHandler, WebhookProcessor};

use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Result type alias for the runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// A pinned, boxed, finite stream of body chunks, in arrival order.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

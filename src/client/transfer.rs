//! File transfer, pagination, and streaming operations on [`ApiClient`].

use super::request::{scalar_to_string, Request};
use super::ApiClient;
use crate::{ByteStream, Error, Result};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

static FILENAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"filename="?([^";]+)"?"#).expect("valid filename pattern"));

/// Pagination controls for [`ApiClient::paginate`].
#[derive(Debug, Clone)]
pub struct PaginateOptions {
    pub params: Option<Value>,
    pub page_param: String,
    pub limit_param: String,
    pub limit: u64,
    pub max_pages: Option<u32>,
    /// Key holding the item array in each response; `None` when the
    /// response itself is the array.
    pub data_key: Option<String>,
}

impl Default for PaginateOptions {
    fn default() -> Self {
        Self {
            params: None,
            page_param: "page".to_string(),
            limit_param: "limit".to_string(),
            limit: 100,
            max_pages: None,
            data_key: None,
        }
    }
}

impl PaginateOptions {
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn data_key(mut self, key: impl Into<String>) -> Self {
        self.data_key = Some(key.into());
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

impl ApiClient {
    /// Upload a local file as `multipart/form-data`.
    ///
    /// Fails fast with [`Error::FileNotFound`] when the file is missing.
    /// Object and array metadata values are sent as JSON parts, scalars
    /// are stringified. Any `Content-Type` header, default or per-call,
    /// is stripped so the transport can set its own multipart boundary.
    pub async fn upload_file(
        &self,
        endpoint: &str,
        file_path: impl AsRef<Path>,
        field_name: &str,
        metadata: Option<Value>,
        params: Option<Value>,
        headers: Option<HashMap<String, String>>,
    ) -> Result<Value> {
        let path = file_path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let bytes = tokio::fs::read(path).await?;

        let url = self.url(endpoint);
        let extra = headers.unwrap_or_default();
        let mut headers = self.merged_headers(&extra);
        headers.retain(|name, _| !name.eq_ignore_ascii_case("content-type"));
        let pairs = query_pairs(params.as_ref());

        let started = Instant::now();
        let result = self
            .retry_policy()
            .run(None, || {
                self.upload_once(
                    &url,
                    &headers,
                    &pairs,
                    field_name,
                    &file_name,
                    &bytes,
                    metadata.as_ref(),
                )
            })
            .await;
        self.record_call(endpoint, "POST", started, &result);
        result
    }

    async fn upload_once(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        pairs: &[(String, String)],
        field_name: &str,
        file_name: &str,
        bytes: &[u8],
        metadata: Option<&Value>,
    ) -> Result<Value> {
        let client = self.session()?;
        let mut form = Form::new().part(
            field_name.to_string(),
            Part::bytes(bytes.to_vec()).file_name(file_name.to_string()),
        );
        if let Some(Value::Object(map)) = metadata {
            for (key, value) in map {
                let part = match value {
                    Value::Object(_) | Value::Array(_) => {
                        Part::text(value.to_string()).mime_str("application/json")?
                    }
                    scalar => Part::text(scalar_to_string(scalar)),
                };
                form = form.part(key.clone(), part);
            }
        }
        let mut builder = client.post(url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if !pairs.is_empty() {
            builder = builder.query(pairs);
        }
        debug!(url = %url, "uploading file");
        let response = builder.multipart(form).send().await?;
        super::classify_response(response).await
    }

    /// Stream a response body to disk in chunks and return the final path.
    ///
    /// When `save_path` is a directory the filename is taken from the
    /// `Content-Disposition` header, falling back to a generated
    /// `file_<uuid>` name. Parent directories are created as needed.
    pub async fn download_file(
        &self,
        endpoint: &str,
        save_path: impl AsRef<Path>,
        params: Option<Value>,
        headers: Option<HashMap<String, String>>,
    ) -> Result<PathBuf> {
        let url = self.url(endpoint);
        let extra = headers.unwrap_or_default();
        let headers = self.merged_headers(&extra);
        let pairs = query_pairs(params.as_ref());
        let save_path = save_path.as_ref().to_path_buf();

        let started = Instant::now();
        let result = self
            .retry_policy()
            .run(None, || self.download_once(&url, &headers, &pairs, &save_path))
            .await;
        self.record_call(endpoint, "GET", started, &result);
        result
    }

    async fn download_once(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        pairs: &[(String, String)],
        save_path: &Path,
    ) -> Result<PathBuf> {
        let client = self.session()?;
        let mut builder = client.get(url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if !pairs.is_empty() {
            builder = builder.query(pairs);
        }
        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(super::failure_from(response).await);
        }

        let target = resolve_target(save_path, response.headers());
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::File::create(&target).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        debug!(path = %target.display(), "file downloaded");
        Ok(target)
    }

    /// Fetch all pages of a paginated endpoint, accumulating items in
    /// page order.
    ///
    /// Stops when a page yields no array, an empty array, fewer than
    /// `limit` items, or `max_pages` is reached. Pages bypass the cache;
    /// a failing page fails the whole call with no partial result.
    pub async fn paginate(&self, endpoint: &str, opts: PaginateOptions) -> Result<Vec<Value>> {
        let mut all_items = Vec::new();
        let mut page: u64 = 1;
        let mut params = match opts.params {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };

        loop {
            params.insert(opts.page_param.clone(), json!(page));
            params.insert(opts.limit_param.clone(), json!(opts.limit));
            let req = Request::get(endpoint)
                .cacheable(false)
                .params(Value::Object(params.clone()));
            let response = self.execute(&req).await?;

            let items = match &opts.data_key {
                Some(key) => response.get(key).cloned().unwrap_or(Value::Null),
                None => response,
            };
            let Value::Array(items) = items else { break };
            if items.is_empty() {
                break;
            }
            let count = items.len() as u64;
            all_items.extend(items);
            if count < opts.limit {
                break;
            }
            if opts.max_pages.is_some_and(|max| page >= u64::from(max)) {
                break;
            }
            page += 1;
        }
        Ok(all_items)
    }

    /// Expose a response body as a lazy, finite, non-restartable sequence
    /// of byte chunks of at most `chunk_size` bytes, in arrival order.
    ///
    /// A non-2xx status before the first chunk surfaces through the normal
    /// error taxonomy; a mid-stream transport failure terminates the
    /// sequence with an error and is never retried, because chunks already
    /// delivered cannot be safely replayed.
    pub async fn stream_response(&self, req: &Request, chunk_size: usize) -> Result<ByteStream> {
        let url = self.url(&req.path);
        let headers = self.merged_headers(&req.headers);

        let started = Instant::now();
        let result = self
            .retry_policy()
            .run(req.cancel.as_ref(), || self.open_stream(req, &url, &headers))
            .await;
        self.record_call(&req.path, req.method.as_str(), started, &result);
        let response = result?;

        let chunk_size = chunk_size.max(1);
        let stream = response
            .bytes_stream()
            .map_err(Error::from)
            .map_ok(move |bytes| {
                futures::stream::iter(split_chunks(bytes, chunk_size).into_iter().map(Ok::<_, Error>))
            })
            .try_flatten();
        Ok(Box::pin(stream))
    }

    async fn open_stream(
        &self,
        req: &Request,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<reqwest::Response> {
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
        let response = builder.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(super::failure_from(response).await)
        }
    }
}

fn resolve_target(save_path: &Path, headers: &reqwest::header::HeaderMap) -> PathBuf {
    if !save_path.is_dir() {
        return save_path.to_path_buf();
    }
    let name = headers
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_filename)
        .unwrap_or_else(|| format!("file_{}", Uuid::new_v4()));
    save_path.join(name)
}

fn parse_filename(disposition: &str) -> Option<String> {
    FILENAME_RE
        .captures(disposition)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn query_pairs(params: Option<&Value>) -> Vec<(String, String)> {
    match params {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), scalar_to_string(v)))
            .collect(),
        _ => Vec::new(),
    }
}

fn split_chunks(mut bytes: Bytes, chunk_size: usize) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(bytes.len() / chunk_size + 1);
    while bytes.len() > chunk_size {
        chunks.push(bytes.split_to(chunk_size));
    }
    if !bytes.is_empty() {
        chunks.push(bytes);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_parsed_from_content_disposition() {
        assert_eq!(
            parse_filename(r#"attachment; filename="report.pdf""#),
            Some("report.pdf".to_string())
        );
        assert_eq!(
            parse_filename("attachment; filename=report.pdf"),
            Some("report.pdf".to_string())
        );
        assert_eq!(parse_filename("attachment"), None);
    }

    #[test]
    fn split_chunks_preserves_content_and_bounds() {
        let chunks = split_chunks(Bytes::from_static(b"abcdefghij"), 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(&chunks[0][..], b"abcd");
        assert_eq!(&chunks[1][..], b"efgh");
        assert_eq!(&chunks[2][..], b"ij");
        assert!(split_chunks(Bytes::new(), 4).is_empty());
    }
}

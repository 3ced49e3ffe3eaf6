//! Integration tests for the core client against a mock HTTP server.

use api_runtime::{
    ApiClient, Error, MemoryCache, NullCache, PaginateOptions, Request, RetryPolicy,
};
use futures::StreamExt;
use mockito::Matcher;
use tokio_test::assert_ok;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn client_for(server: &mockito::Server) -> ApiClient {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    ApiClient::builder(server.url())
        .retry(RetryPolicy::none())
        .build()
        .expect("client builds")
}

#[tokio::test]
async fn get_decodes_json_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/ticker")
        .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"symbol":"BTCUSDT","price":"50000"}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let value = client
        .get("/v1/ticker", Some(json!({"symbol": "BTCUSDT"})))
        .await
        .unwrap();
    assert_eq!(value["price"], "50000");
    mock.assert_async().await;
}

#[tokio::test]
async fn non_json_body_degrades_to_text_wrapper() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/ping")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body("pong")
        .create_async()
        .await;

    let client = client_for(&server);
    let value = client.get("/ping", None).await.unwrap();
    assert_eq!(value, json!({"text": "pong"}));
}

#[tokio::test]
async fn unauthorized_maps_to_auth_error_without_retry() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/private")
        .with_status(401)
        .with_body(r#"{"message":"invalid key"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = ApiClient::builder(server.url())
        .retry(RetryPolicy::new(3, Duration::from_millis(1)))
        .build()
        .unwrap();
    let err = client.get("/v1/private", None).await.unwrap_err();
    match err {
        Error::Auth { status, message, .. } => {
            assert_eq!(status, Some(401));
            assert_eq!(message, "invalid key");
        }
        other => panic!("expected Auth, got {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn rate_limit_honors_retry_after_header_and_defaults() {
    let mut server = mockito::Server::new_async().await;
    let with_header = server
        .mock("GET", "/v1/limited")
        .with_status(429)
        .with_header("Retry-After", "120")
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", "/v1/limited-bare")
        .with_status(429)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let client = ApiClient::builder(server.url())
        .retry(RetryPolicy::new(3, Duration::from_millis(1)))
        .build()
        .unwrap();

    match client.get("/v1/limited", None).await.unwrap_err() {
        Error::RateLimited { retry_after_secs, status, .. } => {
            assert_eq!(retry_after_secs, 120);
            assert_eq!(status, Some(429));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
    match client.get("/v1/limited-bare", None).await.unwrap_err() {
        Error::RateLimited { retry_after_secs, .. } => assert_eq!(retry_after_secs, 60),
        other => panic!("expected RateLimited, got {other:?}"),
    }
    // exactly one attempt despite a retry policy being configured
    with_header.assert_async().await;
}

#[tokio::test]
async fn server_error_carries_status_and_body() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1/broken")
        .with_status(503)
        .with_body(r#"{"message":"maintenance"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client.get("/v1/broken", None).await.unwrap_err();
    match err {
        Error::Api { status, message, body } => {
            assert_eq!(status, Some(503));
            assert!(message.contains("maintenance"));
            assert_eq!(body.unwrap()["message"], "maintenance");
        }
        other => panic!("expected Api, got {other:?}"),
    }
}

#[tokio::test]
async fn repeated_cacheable_get_hits_the_network_once() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/rates")
        .with_status(200)
        .with_body(r#"{"eur":0.92}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let first = tokio_test::assert_ok!(client.get("/v1/rates", None).await);
    let second = tokio_test::assert_ok!(client.get("/v1/rates", None).await);
    assert_eq!(first, second);
    mock.assert_async().await;
}

#[tokio::test]
async fn cache_expires_after_ttl() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/rates")
        .with_status(200)
        .with_body(r#"{"eur":0.92}"#)
        .expect(2)
        .create_async()
        .await;

    let client = ApiClient::builder(server.url())
        .retry(RetryPolicy::none())
        .cache_ttl(Duration::from_millis(40))
        .build()
        .unwrap();
    tokio_test::assert_ok!(client.get("/v1/rates", None).await);
    tokio::time::sleep(Duration::from_millis(80)).await;
    tokio_test::assert_ok!(client.get("/v1/rates", None).await);
    mock.assert_async().await;
}

#[tokio::test]
async fn post_responses_are_never_cached() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/orders")
        .with_status(200)
        .with_body(r#"{"id":1}"#)
        .expect(2)
        .create_async()
        .await;

    let client = client_for(&server);
    client.post("/v1/orders", Some(json!({"qty": 1}))).await.unwrap();
    client.post("/v1/orders", Some(json!({"qty": 1}))).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn clear_cache_forces_a_fresh_fetch() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/rates")
        .with_status(200)
        .with_body(r#"{"eur":0.92}"#)
        .expect(2)
        .create_async()
        .await;

    let client = client_for(&server);
    client.get("/v1/rates", None).await.unwrap();
    client.clear_cache(Some("/v1/rates"), None).await;
    client.get("/v1/rates", None).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn clear_cache_without_endpoint_clears_the_shared_store() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/rates")
        .with_status(200)
        .with_body(r#"{"eur":0.92}"#)
        .expect(2)
        .create_async()
        .await;

    let shared = Arc::new(MemoryCache::default());
    let client = ApiClient::builder(server.url())
        .retry(RetryPolicy::none())
        .cache(shared.clone())
        .build()
        .unwrap();
    client.get("/v1/rates", None).await.unwrap();
    assert_eq!(shared.len(), 1);
    client.clear_cache(None, None).await;
    assert!(shared.is_empty());
    client.get("/v1/rates", None).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn transient_failures_retry_with_exponential_backoff() {
    // nothing listens here; connections are refused immediately
    let client = ApiClient::builder("http://127.0.0.1:9")
        .retry(RetryPolicy::new(3, Duration::from_millis(10)))
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap();

    let started = Instant::now();
    let err = client.get("/v1/anything", None).await.unwrap_err();
    // 4 attempts with sleeps of 10 + 20 + 40 ms between them
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert!(matches!(err, Error::Api { .. }), "exhausted transient wraps into Api: {err:?}");
}

#[tokio::test]
async fn per_call_headers_override_defaults_on_the_wire() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/env")
        .match_header("x-env", "test")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let client = ApiClient::builder(server.url())
        .retry(RetryPolicy::none())
        .header("X-Env", "prod")
        .build()
        .unwrap();
    let req = Request::get("/v1/env").header("X-Env", "test");
    client.execute(&req).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn paginate_stops_on_short_page_and_keeps_order() {
    let mut server = mockito::Server::new_async().await;
    for (page, body) in [
        (1, json!({"data": [1, 2]})),
        (2, json!({"data": [3, 4]})),
        (3, json!({"data": [5, 6]})),
        (4, json!({"data": [7]})),
    ] {
        server
            .mock("GET", "/v1/items")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), page.to_string()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
            ]))
            .with_status(200)
            .with_body(body.to_string())
            .expect(1)
            .create_async()
            .await;
    }

    let client = client_for(&server);
    let items = client
        .paginate("/v1/items", PaginateOptions::default().limit(2).data_key("data"))
        .await
        .unwrap();
    assert_eq!(items, vec![json!(1), json!(2), json!(3), json!(4), json!(5), json!(6), json!(7)]);
}

#[tokio::test]
async fn paginate_respects_max_pages() {
    let mut server = mockito::Server::new_async().await;
    for page in 1..=2 {
        server
            .mock("GET", "/v1/items")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), page.to_string()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
            ]))
            .with_status(200)
            .with_body(json!({"data": [page, page]}).to_string())
            .expect(1)
            .create_async()
            .await;
    }
    let third = server
        .mock("GET", "/v1/items")
        .match_query(Matcher::UrlEncoded("page".into(), "3".into()))
        .with_status(200)
        .with_body(json!({"data": [9, 9]}).to_string())
        .expect(0)
        .create_async()
        .await;

    let client = client_for(&server);
    let items = client
        .paginate(
            "/v1/items",
            PaginateOptions::default().limit(2).max_pages(2).data_key("data"),
        )
        .await
        .unwrap();
    assert_eq!(items.len(), 4);
    third.assert_async().await;
}

#[tokio::test]
async fn paginate_fails_whole_call_on_a_failing_page() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1/items")
        .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
        .with_status(200)
        .with_body(json!({"data": [1, 2]}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/v1/items")
        .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
        .with_status(500)
        .with_body("{}")
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client
        .paginate("/v1/items", PaginateOptions::default().limit(2).data_key("data"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api { status: Some(500), .. }));
}

#[tokio::test]
async fn upload_missing_file_fails_fast() {
    let server = mockito::Server::new_async().await;
    let client = client_for(&server);
    let err = client
        .upload_file("/v1/files", "/definitely/not/here.csv", "file", None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FileNotFound(_)));
}

#[tokio::test]
async fn upload_sends_multipart_with_transport_boundary() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/files")
        .match_header(
            "content-type",
            Matcher::Regex("^multipart/form-data; boundary=.+".to_string()),
        )
        .match_body(Matcher::Regex("quarterly report".to_string()))
        .with_status(201)
        .with_body(r#"{"uploaded":true}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.txt");
    std::fs::write(&path, "quarterly report").unwrap();

    let client = client_for(&server);
    let value = client
        .upload_file(
            "/v1/files",
            &path,
            "file",
            Some(json!({"kind": "report", "tags": ["q3", "draft"]})),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(value["uploaded"], true);
    mock.assert_async().await;
}

#[tokio::test]
async fn upload_carries_params_and_per_call_headers() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/files")
        .match_query(Matcher::UrlEncoded("notify".into(), "true".into()))
        .match_header("x-upload-token", "u1")
        .with_status(201)
        .with_body(r#"{"uploaded":true}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.bin");
    std::fs::write(&path, "payload").unwrap();

    let client = client_for(&server);
    let mut headers = std::collections::HashMap::new();
    headers.insert("X-Upload-Token".to_string(), "u1".to_string());
    client
        .upload_file(
            "/v1/files",
            &path,
            "file",
            None,
            Some(json!({"notify": true})),
            Some(headers),
        )
        .await
        .unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn download_derives_filename_from_content_disposition() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1/files/latest")
        .with_status(200)
        .with_header("content-disposition", r#"attachment; filename="rates.csv""#)
        .with_body("eur,0.92\n")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = client_for(&server);
    let path = client
        .download_file("/v1/files/latest", dir.path(), None, None)
        .await
        .unwrap();
    assert_eq!(path.file_name().unwrap(), "rates.csv");
    assert_eq!(std::fs::read_to_string(path).unwrap(), "eur,0.92\n");
}

#[tokio::test]
async fn download_creates_parent_directories() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1/files/latest")
        .with_status(200)
        .with_body("payload")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested/deep/out.bin");
    let client = client_for(&server);
    let path = client
        .download_file("/v1/files/latest", &target, None, None)
        .await
        .unwrap();
    assert_eq!(path, target);
    assert_eq!(std::fs::read_to_string(target).unwrap(), "payload");
}

#[tokio::test]
async fn download_carries_params_and_per_call_headers() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/files/export")
        .match_query(Matcher::UrlEncoded("format".into(), "csv".into()))
        .match_header("x-export-token", "e1")
        .with_status(200)
        .with_body("eur,0.92\n")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("export.csv");
    let client = client_for(&server);
    let mut headers = std::collections::HashMap::new();
    headers.insert("X-Export-Token".to_string(), "e1".to_string());
    client
        .download_file(
            "/v1/files/export",
            &target,
            Some(json!({"format": "csv"})),
            Some(headers),
        )
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(target).unwrap(), "eur,0.92\n");
    mock.assert_async().await;
}

#[tokio::test]
async fn download_classifies_http_failures() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1/files/gone")
        .with_status(404)
        .with_body(r#"{"message":"no such file"}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = client_for(&server);
    let err = client
        .download_file("/v1/files/gone", dir.path(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api { status: Some(404), .. }));
}

#[tokio::test]
async fn stream_response_yields_bounded_chunks_in_order() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1/export")
        .with_status(200)
        .with_body("abcdefghij")
        .create_async()
        .await;

    let client = client_for(&server);
    let mut stream = client
        .stream_response(&Request::get("/v1/export"), 4)
        .await
        .unwrap();

    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.unwrap();
        assert!(chunk.len() <= 4);
        collected.extend_from_slice(&chunk);
    }
    assert_eq!(collected, b"abcdefghij");
}

#[tokio::test]
async fn stream_response_raises_taxonomy_before_first_chunk() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1/export")
        .with_status(429)
        .with_header("Retry-After", "30")
        .with_body("{}")
        .create_async()
        .await;

    let client = client_for(&server);
    let err = match client.stream_response(&Request::get("/v1/export"), 1024).await {
        Ok(_) => panic!("expected error before first chunk"),
        Err(err) => err,
    };
    match err {
        Error::RateLimited { retry_after_secs, .. } => assert_eq!(retry_after_secs, 30),
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn metrics_record_once_per_visible_call() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1/thing")
        .with_status(200)
        .with_body("{}")
        .expect(2)
        .create_async()
        .await;
    server
        .mock("GET", "/v1/missing")
        .with_status(404)
        .with_body("{}")
        .create_async()
        .await;

    let client = ApiClient::builder(server.url())
        .retry(RetryPolicy::none())
        .cache(Arc::new(NullCache))
        .build()
        .unwrap();
    client.get("/v1/thing", None).await.unwrap();
    client.get("/v1/thing", None).await.unwrap();
    let _ = client.get("/v1/missing", None).await;

    let stats = client.metrics().statistics();
    assert_eq!(stats.requests.total, 3);
    assert_eq!(stats.requests.success, 2);
    assert_eq!(stats.requests.failed, 1);
    assert_eq!(stats.endpoints["GET /v1/thing"].count, 2);
    assert_eq!(stats.endpoints["GET /v1/missing"].failed, 1);
}

#[tokio::test]
async fn cached_hits_still_count_as_visible_calls() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1/rates")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    client.get("/v1/rates", None).await.unwrap();
    client.get("/v1/rates", None).await.unwrap();
    let stats = client.metrics().statistics();
    assert_eq!(stats.requests.total, 2);
    assert_eq!(stats.requests.success, 2);
}

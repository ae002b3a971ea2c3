//! Integration tests for ReqwestTransport using wiremock.

use std::time::Duration;

use ipcache::{
    CacheStatus, Client, FetchError, FetchRequest, MemoryStore, RetryConfig, Transport,
    TransportErrorKind,
};
use ipcache_reqwest::ReqwestTransport;
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn request_parts_are_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(query_param("lang", "en"))
        .and(header("x-api-key", "secret"))
        .and(body_json(serde_json::json!({"q": "graphene"})))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("X-Request-Id", "abc")
                .set_body_string("created"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new().unwrap();
    let request = FetchRequest::post(format!("{}/search", server.uri()))
        .query("lang", "en")
        .header("X-API-KEY", "secret")
        .json(&serde_json::json!({"q": "graphene"}))
        .unwrap();

    let response = transport.send(request).await.unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.header("x-request-id"), Some("abc"));
    assert_eq!(response.text(), "created");
}

#[tokio::test]
async fn error_statuses_are_responses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new().unwrap();
    let response = transport
        .send(FetchRequest::get(server.uri()))
        .await
        .unwrap();

    assert_eq!(response.status, 503);
    assert_eq!(response.text(), "maintenance");
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let transport = ReqwestTransport::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let error = transport
        .send(FetchRequest::get(server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        FetchError::Transport {
            kind: TransportErrorKind::Timeout,
            ..
        }
    ));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn refused_connection_is_retryable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let uri = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let transport = ReqwestTransport::new().unwrap();
    let error = transport.send(FetchRequest::get(uri)).await.unwrap_err();

    assert!(matches!(
        error,
        FetchError::Transport {
            kind: TransportErrorKind::Connect,
            ..
        }
    ));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn client_caches_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/biblio"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Cache-Control", "max-age=600")
                .set_body_string("<biblio/>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::builder("test")
        .base_url(server.uri())
        .store(MemoryStore::new())
        .build(ReqwestTransport::new().unwrap())
        .unwrap();

    let first = client.get("/biblio", [("id", "EP1")]).await.unwrap();
    let second = client.get("/biblio", [("id", "EP1")]).await.unwrap();

    assert_eq!(first.cache_status, CacheStatus::Miss);
    assert_eq!(second.cache_status, CacheStatus::Hit);
    assert_eq!(second.text(), "<biblio/>");
}

#[tokio::test]
async fn client_retries_throttled_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "0")
                .set_body_string("quota exceeded"),
        )
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::builder("test")
        .base_url(server.uri())
        .cache_enabled(false)
        .retry(RetryConfig::default().with_base_delay(Duration::from_millis(10)))
        .build(ReqwestTransport::new().unwrap())
        .unwrap();

    let none: [(&str, &str); 0] = [];
    let response = client.get("/data", none).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "ok");
}

#[tokio::test]
async fn conditional_request_revalidates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("if-none-match", "\"rev-7\""))
        .respond_with(ResponseTemplate::new(304).insert_header("Cache-Control", "max-age=60"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"rev-7\"")
                .insert_header("Cache-Control", "no-cache")
                .set_body_string("family members"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::builder("test")
        .base_url(server.uri())
        .store(MemoryStore::new())
        .build(ReqwestTransport::new().unwrap())
        .unwrap();

    let none: [(&str, &str); 0] = [];
    client.get("/family", none).await.unwrap();
    let revalidated = client.get("/family", none).await.unwrap();

    assert_eq!(revalidated.cache_status, CacheStatus::Revalidated);
    assert_eq!(revalidated.status, 200);
    assert_eq!(revalidated.text(), "family members");
}

use std::time::Duration;

use osdr_storage::{FetchError, HttpClientConfig, HttpFetcher, DEFAULT_USER_AGENT};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn sends_json_accept_user_agent_and_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/datasets"))
        .and(header("accept", "application/json"))
        .and(header("user-agent", DEFAULT_USER_AGENT))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(HttpClientConfig {
        bearer_token: Some("s3cret".into()),
        ..Default::default()
    })
    .expect("client");
    let resp = fetcher
        .fetch_bytes(&format!("{}/datasets", server.uri()))
        .await
        .expect("fetch");

    assert!(resp.status.is_success());
    assert_eq!(resp.body, b"[]");
}

#[tokio::test]
async fn empty_token_sends_no_authorization_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(HttpClientConfig {
        bearer_token: Some(String::new()),
        ..Default::default()
    })
    .expect("client");
    fetcher.fetch_bytes(&server.uri()).await.expect("fetch");

    let requests = server.received_requests().await.expect("recorded");
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(HttpClientConfig::default()).expect("client");
    let err = fetcher.fetch_bytes(&server.uri()).await.expect_err("503");
    match err {
        FetchError::HttpStatus { status, .. } => assert_eq!(status, 503),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn slow_upstream_hits_client_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_millis(50),
        ..Default::default()
    })
    .expect("client");
    let err = fetcher.fetch_bytes(&server.uri()).await.expect_err("timeout");
    assert!(matches!(err, FetchError::Request(e) if e.is_timeout()));
}

//! Credential fetcher integration tests against mocked endpoints.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xirsys_rtc::config::{AppMode, FetchPolicy, SessionConfig};
use xirsys_rtc::credentials::CredentialFetcher;
use xirsys_rtc::error::CredentialFetchError;
use xirsys_rtc::model::identity::ChannelIdentity;

fn config(base_url: &str) -> SessionConfig {
    let identity = ChannelIdentity::new("examples", "alice").unwrap();
    SessionConfig::new(base_url, identity, AppMode::DataChannel).unwrap()
}

async fn mount_ok(server: &MockServer, endpoint: &str, value: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(format!("/xirsys/{endpoint}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"s": "ok", "v": value})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn fetches_all_three_endpoints() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/xirsys/getice.php"))
        .and(body_string_contains("channel=examples"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "s": "ok",
            "v": {"iceServers": [
                {"url": "stun:stun.example.com"},
                {"url": "turn:1.2.3.4:3478?transport=udp", "username": "u", "credential": "c"},
                {"urls": ["turn:1.2.3.4:3478?transport=tcp", "turns:1.2.3.4:5349"], "username": "u", "credential": "c"}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/xirsys/gettoken.php"))
        .and(body_string_contains("username=alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"s": "ok", "v": "abc123"})))
        .expect(1)
        .mount(&server)
        .await;

    mount_ok(&server, "gethost.php", json!("wss://sig.example.com")).await;

    let fetcher = CredentialFetcher::new(&config(&format!("{}/xirsys", server.uri()))).unwrap();
    let credentials = fetcher.fetch().await.unwrap();

    let urls: Vec<&str> = credentials
        .ice_servers
        .iter()
        .flat_map(|s| s.urls.iter().map(String::as_str))
        .collect();
    assert_eq!(
        urls,
        vec![
            "stun:stun.example.com",
            "turn:1.2.3.4:3478?transport=udp",
            "turn:1.2.3.4:3478?transport=tcp",
            "turns:1.2.3.4:5349",
        ]
    );
    assert_eq!(credentials.ice_servers[1].username.as_deref(), Some("u"));
    assert_eq!(credentials.token.as_str(), "abc123");
    assert_eq!(credentials.host, "wss://sig.example.com");
}

#[tokio::test]
async fn server_error_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xirsys/getice.php"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fetcher = CredentialFetcher::new(&config(&format!("{}/xirsys", server.uri()))).unwrap();
    let err = fetcher.fetch().await.unwrap_err();

    match err {
        CredentialFetchError::Status { endpoint, status } => {
            assert_eq!(endpoint, "getice.php");
            assert_eq!(status.as_u16(), 503);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn rejected_envelope_is_an_error() {
    let server = MockServer::start().await;
    mount_ok(&server, "getice.php", json!({"iceServers": []})).await;
    Mock::given(method("POST"))
        .and(path("/xirsys/gettoken.php"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"s": "error", "v": "unauthorized"})),
        )
        .mount(&server)
        .await;

    let fetcher = CredentialFetcher::new(&config(&format!("{}/xirsys", server.uri()))).unwrap();
    let err = fetcher.fetch().await.unwrap_err();
    assert!(matches!(err, CredentialFetchError::Rejected { .. }));
}

#[tokio::test]
async fn unparseable_body_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xirsys/getice.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let fetcher = CredentialFetcher::new(&config(&format!("{}/xirsys", server.uri()))).unwrap();
    let err = fetcher.ice_servers().await.unwrap_err();
    assert!(matches!(err, CredentialFetchError::Body { .. }));
}

#[tokio::test]
async fn unreachable_endpoint_is_an_error() {
    // Nothing listens on port 9 of localhost.
    let fetcher = CredentialFetcher::new(&config("http://127.0.0.1:9/xirsys")).unwrap();
    let err = fetcher.token().await.unwrap_err();
    assert!(matches!(err, CredentialFetchError::Http { .. }));
}

#[tokio::test]
async fn single_attempt_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xirsys/gethost.php"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = CredentialFetcher::new(&config(&format!("{}/xirsys", server.uri()))).unwrap();
    assert!(fetcher.host().await.is_err());
}

#[tokio::test]
async fn retries_server_errors_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xirsys/gethost.php"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_ok(&server, "gethost.php", json!("wss://sig.example.com")).await;

    let config = config(&format!("{}/xirsys", server.uri())).with_fetch_policy(FetchPolicy {
        attempts: 2,
        backoff: Duration::from_millis(10),
    });
    let fetcher = CredentialFetcher::new(&config).unwrap();

    assert_eq!(fetcher.host().await.unwrap(), "wss://sig.example.com");
}

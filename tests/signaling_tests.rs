//! Signaling channel integration tests.
//!
//! The credential endpoints are mocked with wiremock and the signaling host is
//! a local tokio-tungstenite server.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xirsys_rtc::config::{AppMode, SessionConfig};
use xirsys_rtc::credentials::{CredentialFetcher, SignalingToken};
use xirsys_rtc::error::SessionError;
use xirsys_rtc::model::identity::ChannelIdentity;
use xirsys_rtc::model::signal::{Inbound, PeerMessage};
use xirsys_rtc::signaling::SignalingChannel;

fn config(base_url: &str) -> SessionConfig {
    let identity = ChannelIdentity::new("examples", "alice").unwrap();
    SessionConfig::new(base_url, identity, AppMode::DataChannel)
        .unwrap()
        .with_ping_interval(None)
}

async fn mount(server: &MockServer, endpoint: &str, value: Value) {
    Mock::given(method("POST"))
        .and(path(format!("/xirsys/{endpoint}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"s": "ok", "v": value})))
        .mount(server)
        .await;
}

/// A signaling host that accepts one connection, reports the request path,
/// announces `bob`, echoes back the first frame it receives and then closes.
async fn signaling_host() -> (String, oneshot::Receiver<String>, oneshot::Receiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (path_tx, path_rx) = oneshot::channel();
    let (frame_tx, frame_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let _ = path_tx.send(req.uri().path().to_string());
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();

        ws.send(Message::Text(
            json!({"m": {"f": "examples/bob", "o": "peer_connected"}}).to_string(),
        ))
        .await
        .unwrap();

        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let _ = frame_tx.send(serde_json::from_str(&text).unwrap());
                break;
            }
        }

        ws.close(None).await.unwrap();
    });

    (format!("ws://{addr}"), path_rx, frame_rx)
}

#[tokio::test]
async fn channel_opens_to_fetched_host_with_token() {
    let (host, path_rx, frame_rx) = signaling_host().await;

    let server = MockServer::start().await;
    mount(
        &server,
        "getice.php",
        json!({"iceServers": [{"url": "turn:1.2.3.4:3478"}]}),
    )
    .await;
    mount(&server, "gettoken.php", json!("abc123")).await;
    mount(&server, "gethost.php", json!(host)).await;

    let config = config(&format!("{}/xirsys", server.uri()));
    let credentials = CredentialFetcher::new(&config).unwrap().fetch().await.unwrap();
    assert_eq!(credentials.ice_servers[0].urls, vec!["turn:1.2.3.4:3478"]);
    assert_eq!(credentials.host, host);

    let mut channel = SignalingChannel::open(&credentials.host, credentials.token, &config)
        .await
        .unwrap();
    assert_eq!(path_rx.await.unwrap(), "/v2/abc123");

    // Presence is decoded.
    assert_eq!(
        channel.recv().await.unwrap(),
        Inbound::PeerConnected("bob".into())
    );

    // Outbound messages are addressed from channel/user to the peer.
    channel
        .send("bob", &PeerMessage::Offer { sdp: "v=0".into() })
        .await
        .unwrap();
    let frame = frame_rx.await.unwrap();
    assert_eq!(frame["m"]["f"], "examples/alice");
    assert_eq!(frame["m"]["t"], "bob");
    assert_eq!(frame["p"]["msg"]["type"], "offer");

    // The host closes: terminal, and stays so.
    let err = channel.recv().await.unwrap_err();
    assert!(matches!(err, SessionError::Channel(_)));
    assert!(channel.is_closed());
    assert!(matches!(
        channel.recv().await.unwrap_err(),
        SessionError::Channel(_)
    ));
    assert!(channel
        .send("bob", &PeerMessage::Bye)
        .await
        .is_err());
}

#[tokio::test]
async fn unreachable_host_fails_to_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = config("http://127.0.0.1/xirsys");
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        SignalingChannel::open(&format!("ws://{addr}"), SignalingToken::new("abc123"), &config),
    )
    .await
    .unwrap();

    assert!(result.is_err());
}

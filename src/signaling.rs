//! Signaling channel
//!
//! A websocket to `{host}/v2/{token}` over which offers, answers, candidates
//! and `bye` are relayed to the other peer. Presence notifications from the
//! host arrive on the same socket.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, time::Interval};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::{SessionConfig, Verbosity};
use crate::credentials::SignalingToken;
use crate::error::{ChannelClosedError, SessionError};
use crate::model::identity::ChannelIdentity;
use crate::model::signal::{self, Inbound, PeerMessage};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct SignalingChannel {
    identity: ChannelIdentity,
    ws: Ws,
    ping: Option<Interval>,
    verbosity: Verbosity,
    /// Set once the socket is gone. Every later call fails with it.
    closed: Option<ChannelClosedError>,
}

/// Websocket URL for a host and token.
pub fn signaling_url(host: &str, token: &SignalingToken) -> String {
    format!("{}/v2/{}", host.trim_end_matches('/'), token.as_str())
}

impl SignalingChannel {
    /// Connects to the signaling host. The token is consumed.
    pub async fn open(
        host: &str,
        token: SignalingToken,
        config: &SessionConfig,
    ) -> Result<Self, ChannelClosedError> {
        let url = signaling_url(host, &token);
        if config.verbosity.is_verbose() {
            debug!("Signaling url: {}", url);
        }

        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ChannelClosedError::new(format!("connect to {host} failed: {e}")))?;

        info!("Connected to signaling host {} as {}", host, config.identity);

        Ok(Self {
            identity: config.identity.clone(),
            ws,
            ping: config.ping_interval.map(keepalive),
            verbosity: config.verbosity,
            closed: None,
        })
    }

    pub fn identity(&self) -> &ChannelIdentity {
        &self.identity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Sends `message` to the user `to`.
    pub async fn send(&mut self, to: &str, message: &PeerMessage) -> Result<(), ChannelClosedError> {
        self.check_open()?;

        let text = signal::encode(&self.identity, to, message)
            .map_err(|e| ChannelClosedError::new(format!("encode failed: {e}")))?;

        if self.verbosity.is_verbose() {
            debug!("Sending over websocket: {}", text);
        } else {
            debug!("Sending {} to {}", message.kind(), to);
        }

        if let Err(e) = self.ws.send(Message::Text(text)).await {
            return Err(self.fail(format!("send failed: {e}")));
        }
        Ok(())
    }

    /// Next inbound event.
    ///
    /// Keepalive pings and control frames are handled here and never returned.
    /// Fails with [`ChannelClosedError`] once the socket is gone, and keeps
    /// failing after that. A frame that is not a signaling envelope at all is
    /// returned as a negotiation error.
    pub async fn recv(&mut self) -> Result<Inbound, SessionError> {
        loop {
            self.check_open()?;

            let frame = tokio::select! {
                frame = self.ws.next() => frame,
                _ = tick(&mut self.ping) => {
                    debug!("Sending keepalive ping");
                    if let Err(e) = self.ws.send(Message::Ping(b"keepalive".to_vec())).await {
                        return Err(self.fail(format!("ping failed: {e}")).into());
                    }
                    continue;
                }
            };

            let text = match frame {
                None => return Err(self.fail("stream ended").into()),
                Some(Err(e)) => return Err(self.fail(e.to_string()).into()),
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!("Dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("closed by host: {} {}", f.code, f.reason))
                        .unwrap_or_else(|| "closed by host".to_string());
                    return Err(self.fail(reason).into());
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            };

            if self.verbosity.is_verbose() {
                debug!("Received over websocket: {}", text);
            }

            return signal::decode(&text).map_err(SessionError::from);
        }
    }

    /// Closes the websocket. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed.is_some() {
            return;
        }
        if let Err(e) = self.ws.close(None).await {
            debug!("Websocket close: {}", e);
        }
        self.closed = Some(ChannelClosedError::new("closed locally"));
        debug!("Finished signaling");
    }

    fn check_open(&self) -> Result<(), ChannelClosedError> {
        match &self.closed {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn fail(&mut self, reason: impl Into<String>) -> ChannelClosedError {
        let e = ChannelClosedError::new(reason);
        warn!("{}", e);
        self.closed = Some(e.clone());
        e
    }
}

fn keepalive(period: Duration) -> Interval {
    // The first tick of a plain interval fires immediately.
    tokio::time::interval_at(tokio::time::Instant::now() + period, period)
}

async fn tick(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_host_and_token() {
        let token = SignalingToken::new("abc123");
        assert_eq!(
            signaling_url("wss://sig.example.com", &token),
            "wss://sig.example.com/v2/abc123"
        );
        assert_eq!(
            signaling_url("wss://sig.example.com/", &token),
            "wss://sig.example.com/v2/abc123"
        );
    }
}

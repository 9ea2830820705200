//! WebRTC peer session
//!
//! Runs one session end to end:
//! 1. Fetches ICE servers, a token and a signaling host
//! 2. Binds a UDP socket on a routable interface and creates the engine
//! 3. Opens the signaling channel
//! 4. Loops over signaling, UDP input, engine timeouts and app pacing until
//!    the peer says `bye`, the user interrupts, or something fails
//! 5. Says `bye`, closes the websocket and disconnects the engine, on every
//!    exit path
//!
//! Everything runs on one task; the negotiator owns the session state.

use std::{
    io::ErrorKind,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Instant,
};

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::{AppMode, SessionConfig};
use crate::credentials::CredentialFetcher;
use crate::engine::{EngineEvent, Str0mEngine};
use crate::error::Result;
use crate::media::{BlackholeSink, FileSource, TimedFrame};
use crate::model::payload::Payload;
use crate::negotiator::{NegotiationState, Negotiator, Outgoing};
use crate::signaling::SignalingChannel;
use crate::util::select_host_address;

const PING_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);
const PING: &[u8] = b"ping";
const PONG: &[u8] = b"pong";

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The remote peer hung up or left.
    RemoteClosed,
    /// Ctrl+C.
    Interrupted,
}

/// Runs one session with the given configuration.
pub async fn run(config: SessionConfig) -> Result<SessionEnd> {
    let fetcher = CredentialFetcher::new(&config)?;
    let credentials = fetcher.fetch().await?;

    let host_addr = select_host_address().unwrap_or_else(|| {
        warn!("Found no routable interface, using loopback");
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    });
    let socket = UdpSocket::bind(SocketAddr::new(host_addr, 0)).await?;
    let local_addr = socket.local_addr()?;
    info!("UDP socket bound to: {}", local_addr);

    let source = match &config.mode {
        AppMode::Video {
            video_file: Some(path),
        } => match FileSource::open(path) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!("Can not play {}: {}, receiving only", path.display(), e);
                None
            }
        },
        _ => None,
    };

    let engine = Str0mEngine::new(
        local_addr,
        credentials.ice_servers,
        config.mode.clone(),
        source.is_some(),
    );
    let mut negotiator = Negotiator::new(engine, &config);

    let mut channel =
        match SignalingChannel::open(&credentials.host, credentials.token, &config).await {
            Ok(channel) => channel,
            Err(e) => {
                negotiator.close("signaling unavailable");
                return Err(e.into());
            }
        };

    let app = App::new(&config.mode, source);
    let result = drive(&mut negotiator, &mut channel, &socket, app).await;

    if let Some(bye) = negotiator.hangup() {
        if let Err(e) = channel.send(&bye.to, &bye.message).await {
            debug!("Could not say bye: {}", e);
        }
    }
    channel.close().await;

    result
}

async fn drive(
    negotiator: &mut Negotiator<Str0mEngine>,
    channel: &mut SignalingChannel,
    socket: &UdpSocket,
    mut app: App,
) -> Result<SessionEnd> {
    info!("Starting signaling...");

    let mut buf = vec![0; 2000];
    let mut events = Vec::new();

    loop {
        let timeout = negotiator
            .engine_mut()
            .poll_until_timeout(socket, &mut events);

        for event in events.drain(..) {
            match event {
                EngineEvent::Connected => negotiator.on_transport_connected(),
                EngineEvent::Disconnected => negotiator.close("ICE disconnected"),
                other => app.on_event(other, negotiator.engine_mut()),
            }
        }

        if negotiator.is_closed() {
            return Ok(SessionEnd::RemoteClosed);
        }

        let app_deadline = app.next_deadline(negotiator.engine());

        tokio::select! {
            inbound = channel.recv() => {
                let inbound = match inbound {
                    Ok(inbound) => inbound,
                    Err(e) => {
                        negotiator.close(&e.to_string());
                        return Err(e);
                    }
                };
                let outgoing = negotiator.handle(inbound)?;
                send_all(channel, outgoing).await?;
            }

            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((n, source)) => negotiator.engine_mut().handle_receive(source, &buf[..n]),
                    // ICMP unreachable from a dead candidate, not fatal.
                    Err(e) if e.kind() == ErrorKind::ConnectionReset => debug!("UDP recv: {}", e),
                    Err(e) => return Err(e.into()),
                }
            }

            _ = sleep_until(timeout) => {
                negotiator.engine_mut().handle_timeout(Instant::now());
            }

            _ = sleep_until(app_deadline) => {
                app.on_deadline(negotiator.engine_mut());
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Detected Ctrl+C, terminating...");
                return Ok(SessionEnd::Interrupted);
            }
        }

        if negotiator.state() == NegotiationState::Closed {
            return Ok(SessionEnd::RemoteClosed);
        }
    }
}

async fn send_all(channel: &mut SignalingChannel, outgoing: Vec<Outgoing>) -> Result<()> {
    for out in outgoing {
        channel.send(&out.to, &out.message).await?;
    }
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(t) => tokio::time::sleep_until(tokio::time::Instant::from_std(t)).await,
        None => std::future::pending::<()>().await,
    }
}

/// What the session does once media flows.
enum App {
    /// Sends a timestamped ping every second, answers pings with pongs, logs
    /// the round trip of every pong.
    DataChannel {
        open: bool,
        seq: u64,
        next_ping: Option<Instant>,
    },
    /// Streams the file source, if any, and drops incoming media.
    Video {
        source: Option<FileSource>,
        next_frame: Option<TimedFrame>,
        started: Option<Instant>,
        sink: BlackholeSink,
    },
}

impl App {
    fn new(mode: &AppMode, source: Option<FileSource>) -> Self {
        match mode {
            AppMode::DataChannel => App::DataChannel {
                open: false,
                seq: 0,
                next_ping: None,
            },
            AppMode::Video { .. } => App::Video {
                source,
                next_frame: None,
                started: None,
                sink: BlackholeSink::default(),
            },
        }
    }

    fn on_event(&mut self, event: EngineEvent, engine: &mut Str0mEngine) {
        match (self, event) {
            (App::DataChannel { open, next_ping, .. }, EngineEvent::ChannelOpen(label)) => {
                info!("Data channel '{}' ready", label);
                *open = true;
                *next_ping = Some(Instant::now());
            }
            (App::DataChannel { .. }, EngineEvent::ChannelData(bytes)) => {
                handle_payload(&bytes, engine)
            }
            (App::Video { sink, .. }, EngineEvent::MediaData(data)) => sink.consume(&data),
            (_, event) => debug!("Unhandled engine event {:?}", event),
        }
    }

    fn next_deadline(&mut self, engine: &Str0mEngine) -> Option<Instant> {
        match self {
            App::DataChannel {
                open: true,
                next_ping,
                ..
            } => *next_ping,
            App::DataChannel { .. } => None,
            App::Video {
                source,
                next_frame,
                started,
                ..
            } => {
                if !engine.video_ready() {
                    return None;
                }
                let src = source.as_mut()?;

                if next_frame.is_none() {
                    match src.next_frame() {
                        Ok(frame) => *next_frame = Some(frame),
                        Err(e) => {
                            warn!("Stopping video source: {}", e);
                            *source = None;
                            return None;
                        }
                    }
                }

                let start = *started.get_or_insert_with(Instant::now);
                next_frame.as_ref().map(|f| start + f.at)
            }
        }
    }

    fn on_deadline(&mut self, engine: &mut Str0mEngine) {
        match self {
            App::DataChannel { seq, next_ping, .. } => {
                *seq += 1;
                match Payload::new(*seq, PING).serialize() {
                    Ok(bytes) => {
                        if !engine.write_channel(true, &bytes) {
                            debug!("Ping {} not sent", seq);
                        }
                    }
                    Err(e) => warn!("Payload encode failed: {}", e),
                }
                *next_ping = Some(Instant::now() + PING_INTERVAL);
            }
            App::Video {
                source, next_frame, ..
            } => {
                let (Some(src), Some(frame)) = (source.as_ref(), next_frame.take()) else {
                    return;
                };
                engine.write_video(src.codec(), frame, Instant::now());
            }
        }
    }
}

fn handle_payload(bytes: &[u8], engine: &mut Str0mEngine) {
    let payload = match Payload::deserialize(bytes) {
        Ok(p) => p,
        Err(_) => {
            info!("Received message: {}", String::from_utf8_lossy(bytes));
            return;
        }
    };

    if payload.data == PING {
        let pong = Payload {
            data: PONG.to_vec(),
            ..payload
        };
        if let Ok(bytes) = pong.serialize() {
            engine.write_channel(true, &bytes);
        }
    } else if payload.data == PONG {
        info!(
            "Pong {} sent at {}, round trip {} ms",
            payload.seq,
            payload.timestamp(),
            payload.latency().num_milliseconds()
        );
    } else {
        info!("Received message {}: {}", payload.seq, payload.data());
    }
}

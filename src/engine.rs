//! Media engine
//!
//! [`MediaEngine`] is what the negotiator needs from a WebRTC stack: create and
//! apply session descriptions, take remote candidates, hand out local ones.
//! [`Str0mEngine`] implements it over `str0m`, which is sans-IO: the peer
//! session feeds it UDP datagrams and timeouts and transmits what it outputs.

use std::net::SocketAddr;
use std::time::Instant;

use str0m::{
    change::{SdpAnswer, SdpOffer, SdpPendingOffer},
    channel::ChannelId,
    format::Codec,
    media::MediaTime,
    net::{Protocol, Receive},
    Candidate, Event, IceConnectionState, Input, Output, Rtc,
};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::AppMode;
use crate::error::NegotiationError;
use crate::media::{TimedFrame, VideoCodec};
use crate::model::description::{IceCandidate, SdpKind, SessionDescription};
use crate::model::ice::IceServerDescriptor;
use crate::model::tracks::{TrackState, VideoTrack};

/// Label of the data channel the data-channel app opens.
pub const DATA_CHANNEL_LABEL: &str = "xirsys";

pub trait MediaEngine {
    /// A local offer. Becomes the pending local description.
    fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError>;

    /// Applies a remote offer and returns the local answer.
    fn accept_offer(
        &mut self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError>;

    /// Applies the remote answer to the pending local offer.
    fn accept_answer(&mut self, answer: &SessionDescription) -> Result<(), NegotiationError>;

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), NegotiationError>;

    /// Local candidates not yet handed out.
    fn take_local_candidates(&mut self) -> Vec<IceCandidate>;

    /// Releases transport resources. Idempotent.
    fn close(&mut self);
}

/// What the session loop needs to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Connected,
    Disconnected,
    ChannelOpen(String),
    ChannelData(Vec<u8>),
    MediaData(Vec<u8>),
}

pub struct Str0mEngine {
    rtc: Rtc,
    local_addr: SocketAddr,
    ice_servers: Vec<IceServerDescriptor>,
    local_candidates: Vec<IceCandidate>,
    pending: Option<SdpPendingOffer>,
    channel: Option<ChannelId>,
    video: Option<VideoTrack>,
    mode: AppMode,
}

fn malformed(what: &'static str, e: impl std::fmt::Display) -> NegotiationError {
    NegotiationError::Malformed {
        what,
        reason: e.to_string(),
    }
}

fn engine_err(e: impl std::fmt::Display) -> NegotiationError {
    NegotiationError::Engine(e.to_string())
}

fn expect_kind(desc: &SessionDescription, kind: SdpKind) -> Result<(), NegotiationError> {
    if desc.kind != kind {
        return Err(NegotiationError::Malformed {
            what: "session description",
            reason: format!("expected {kind}, got {}", desc.kind),
        });
    }
    Ok(())
}

impl Str0mEngine {
    /// An engine whose only local candidate is the host address the session
    /// socket is bound to.
    ///
    /// str0m gathers host candidates only; the ICE servers are kept for
    /// reference but no STUN/TURN allocation is made.
    pub fn new(
        local_addr: SocketAddr,
        ice_servers: Vec<IceServerDescriptor>,
        mode: AppMode,
        has_video_source: bool,
    ) -> Self {
        let mut rtc = Rtc::builder().build();

        for server in &ice_servers {
            debug!("ICE server configured: {:?}", server.urls);
        }
        if ice_servers.iter().any(IceServerDescriptor::is_turn) {
            info!("TURN servers are not used, relying on host candidates");
        }

        let mut local_candidates = vec![];
        if let Some(candidate) = crate::util::host_candidate(local_addr) {
            local_candidates.push(IceCandidate {
                candidate: candidate.to_sdp_string(),
                sdp_mid: None,
                sdp_mline_index: Some(0),
            });
            rtc.add_local_candidate(candidate);
        }

        let video = match mode {
            AppMode::Video { .. } => Some(VideoTrack::new(has_video_source)),
            AppMode::DataChannel => None,
        };

        Self {
            rtc,
            local_addr,
            ice_servers,
            local_candidates,
            pending: None,
            channel: None,
            video,
            mode,
        }
    }

    pub fn ice_servers(&self) -> &[IceServerDescriptor] {
        &self.ice_servers
    }

    pub fn is_alive(&self) -> bool {
        self.rtc.is_alive()
    }

    /// Feeds one received datagram.
    pub fn handle_receive(&mut self, source: SocketAddr, contents: &[u8]) {
        // Parse data to a DatagramRecv, which helps demultiplex STUN, DTLS and RTP.
        let Ok(contents) = contents.try_into() else {
            debug!("Dropping unrecognised datagram from {}", source);
            return;
        };
        self.handle_input(Input::Receive(
            Instant::now(),
            Receive {
                proto: Protocol::Udp,
                source,
                destination: self.local_addr,
                contents,
            },
        ));
    }

    /// Drives time forward.
    pub fn handle_timeout(&mut self, now: Instant) {
        self.handle_input(Input::Timeout(now));
    }

    fn handle_input(&mut self, input: Input) {
        if !self.rtc.is_alive() {
            return;
        }

        if let Err(e) = self.rtc.handle_input(input) {
            warn!("Engine disconnected: {:?}", e);
            self.rtc.disconnect();
        }
    }

    /// Poll all the output until the engine asks for a timeout.
    /// Datagrams are sent on `socket`, events are collected into `events`.
    pub fn poll_until_timeout(
        &mut self,
        socket: &UdpSocket,
        events: &mut Vec<EngineEvent>,
    ) -> Option<Instant> {
        loop {
            if !self.rtc.is_alive() {
                return None;
            }

            match self.rtc.poll_output() {
                Ok(Output::Timeout(t)) => return Some(t),
                Ok(Output::Transmit(transmit)) => {
                    if let Err(e) = socket.try_send_to(&transmit.contents, transmit.destination) {
                        debug!("Dropping datagram to {}: {}", transmit.destination, e);
                    }
                }
                Ok(Output::Event(event)) => {
                    if let Some(e) = self.handle_event(event) {
                        events.push(e);
                    }
                }
                Err(e) => {
                    warn!("poll_output failed: {:?}", e);
                    self.rtc.disconnect();
                    return None;
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) -> Option<EngineEvent> {
        match event {
            Event::IceConnectionStateChange(state) => {
                info!("ICE connection state: {:?}", state);
                match state {
                    IceConnectionState::Connected => Some(EngineEvent::Connected),
                    IceConnectionState::Disconnected => Some(EngineEvent::Disconnected),
                    _ => None,
                }
            }
            Event::ChannelOpen(cid, label) => {
                info!("Data channel '{}' ({:?}) is open", label, cid);
                self.channel.get_or_insert(cid);
                Some(EngineEvent::ChannelOpen(label))
            }
            Event::ChannelData(data) => Some(EngineEvent::ChannelData(data.data)),
            Event::ChannelClose(cid) => {
                info!("Data channel {:?} closed", cid);
                if self.channel == Some(cid) {
                    self.channel = None;
                }
                None
            }
            Event::MediaAdded(added) => {
                info!("Remote added {:?} media {:?}", added.kind, added.mid);
                if let Some(video) = &mut self.video {
                    if video.mid().is_none() && added.kind == video.kind {
                        video.state = TrackState::Open(added.mid);
                    }
                }
                None
            }
            Event::MediaData(data) => Some(EngineEvent::MediaData(data.data)),
            other => {
                debug!("Event: {:?}", other);
                None
            }
        }
    }

    /// Writes on the data channel. False while no channel is open.
    pub fn write_channel(&mut self, binary: bool, data: &[u8]) -> bool {
        let Some(mut channel) = self.channel.and_then(|id| self.rtc.channel(id)) else {
            return false;
        };
        match channel.write(binary, data) {
            Ok(written) => written,
            Err(e) => {
                warn!("Data channel write failed: {:?}", e);
                false
            }
        }
    }

    /// True once the video track can carry outbound frames.
    pub fn video_ready(&self) -> bool {
        self.video
            .as_ref()
            .is_some_and(|v| v.can_send() && v.open_mid().is_some())
    }

    /// Writes one pre-encoded frame on the video track.
    pub fn write_video(&mut self, codec: VideoCodec, frame: TimedFrame, wallclock: Instant) -> bool {
        let Some(mid) = self.video.as_ref().and_then(VideoTrack::open_mid) else {
            return false;
        };
        let Some(writer) = self.rtc.writer(mid) else {
            return false;
        };

        let wanted = match codec {
            VideoCodec::Vp8 => Codec::Vp8,
            VideoCodec::Vp9 => Codec::Vp9,
        };
        let Some(pt) = writer
            .payload_params()
            .find(|p| p.spec().codec == wanted)
            .map(|p| p.pt())
        else {
            warn!("Remote did not negotiate {:?}", wanted);
            return false;
        };

        let rtp_time = MediaTime::from_90khz(frame.rtp_ticks.try_into().unwrap_or_default());
        if let Err(e) = writer.write(pt, wallclock, rtp_time, frame.data) {
            warn!("Video write failed: {:?}", e);
            self.rtc.disconnect();
            return false;
        }
        true
    }
}

impl MediaEngine for Str0mEngine {
    fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        let mut change = self.rtc.sdp_api();

        if self.mode == AppMode::DataChannel {
            let cid = change.add_channel(DATA_CHANNEL_LABEL.to_string());
            debug!("Requested data channel '{}' with ID {:?}", DATA_CHANNEL_LABEL, cid);
            self.channel = Some(cid);
        }

        if let Some(video) = &mut self.video {
            if video.state == TrackState::ToOpen {
                let mid = change.add_media(video.kind, video.direction, None, None, None);
                video.state = TrackState::Negotiating(mid);
            }
        }

        let (offer, pending) = change
            .apply()
            .ok_or_else(|| engine_err("nothing to offer"))?;
        self.pending = Some(pending);

        Ok(SessionDescription::offer(offer.to_sdp_string()))
    }

    fn accept_offer(
        &mut self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        expect_kind(offer, SdpKind::Offer)?;
        let offer = SdpOffer::from_sdp_string(&offer.sdp).map_err(|e| malformed("offer", e))?;

        let answer = self.rtc.sdp_api().accept_offer(offer).map_err(engine_err)?;

        Ok(SessionDescription::answer(answer.to_sdp_string()))
    }

    fn accept_answer(&mut self, answer: &SessionDescription) -> Result<(), NegotiationError> {
        expect_kind(answer, SdpKind::Answer)?;
        let pending = self.pending.take().ok_or(NegotiationError::OutOfOrder {
            what: "answer",
            state: "no pending offer".to_string(),
        })?;
        let answer = SdpAnswer::from_sdp_string(&answer.sdp).map_err(|e| malformed("answer", e))?;

        self.rtc
            .sdp_api()
            .accept_answer(pending, answer)
            .map_err(engine_err)?;

        if let Some(video) = &mut self.video {
            video.confirm();
        }
        Ok(())
    }

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), NegotiationError> {
        let line = format!("candidate:{}", candidate.attribute());
        let parsed = Candidate::from_sdp_string(&line).map_err(|e| malformed("candidate", e))?;
        self.rtc.add_remote_candidate(parsed);
        Ok(())
    }

    fn take_local_candidates(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.local_candidates)
    }

    fn close(&mut self) {
        if self.rtc.is_alive() {
            debug!("Disconnecting media engine");
            self.rtc.disconnect();
        }
    }
}

impl Drop for Str0mEngine {
    fn drop(&mut self) {
        self.close();
    }
}

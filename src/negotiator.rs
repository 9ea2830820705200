//! Session negotiator
//!
//! Offer/answer state machine for one peer connection. It does no I/O: inbound
//! signals go in through [`Negotiator::handle`], the messages to relay to the
//! remote peer come back out as [`Outgoing`], and descriptions and candidates
//! are applied to a [`MediaEngine`].
//!
//! ```text
//! Idle -> OfferCreated -> OfferSent -> AnswerReceived -> Connected -> Closed
//! Idle -> OfferReceived -> AnswerCreated -> AnswerSent -> Connected
//! ```

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, info, warn};

use crate::config::{SessionConfig, Verbosity};
use crate::engine::MediaEngine;
use crate::error::NegotiationError;
use crate::model::description::{IceCandidate, SessionDescription};
use crate::model::identity::ChannelIdentity;
use crate::model::signal::{Inbound, PeerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferCreated,
    OfferSent,
    AnswerReceived,
    OfferReceived,
    AnswerCreated,
    AnswerSent,
    Connected,
    Closed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A message to relay to `to` over the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub to: String,
    pub message: PeerMessage,
}

type CandidateKey = (String, Option<String>, Option<u16>);

pub struct Negotiator<E> {
    engine: E,
    identity: ChannelIdentity,
    verbosity: Verbosity,
    state: NegotiationState,
    /// The remote user, fixed by the first offer sent or received.
    peer: Option<String>,
    remote_description_set: bool,
    /// Candidates that arrived before the remote description, with their sender.
    buffered: Vec<(String, IceCandidate)>,
    applied: HashSet<CandidateKey>,
}

impl<E: MediaEngine> Negotiator<E> {
    pub fn new(engine: E, config: &SessionConfig) -> Self {
        Self {
            engine,
            identity: config.identity.clone(),
            verbosity: config.verbosity,
            state: NegotiationState::Idle,
            peer: None,
            remote_description_set: false,
            buffered: Vec::new(),
            applied: HashSet::new(),
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.state == NegotiationState::Closed
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Number of remote candidates waiting for the remote description.
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    fn set_state(&mut self, state: NegotiationState) {
        debug!("Negotiation state changed from {} to {}", self.state, state);
        self.state = state;
    }

    /// Starts the initiator path towards `peer`.
    pub fn initiate(&mut self, peer: &str) -> Result<Vec<Outgoing>, NegotiationError> {
        if self.state != NegotiationState::Idle {
            return Err(NegotiationError::OutOfOrder {
                what: "initiate",
                state: self.state.to_string(),
            });
        }

        info!("Making an offer to {}", peer);
        self.peer = Some(peer.to_string());

        let offer = match self.engine.create_offer() {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail(e)),
        };
        self.log_description("Local", &offer);
        self.set_state(NegotiationState::OfferCreated);

        let out = self.emit_description(peer, offer);
        self.set_state(NegotiationState::OfferSent);
        Ok(out)
    }

    /// Feeds one inbound signaling event.
    ///
    /// A description that is malformed or arrives in the wrong state closes
    /// the session and is returned as an error.
    pub fn handle(&mut self, inbound: Inbound) -> Result<Vec<Outgoing>, NegotiationError> {
        if self.is_closed() {
            debug!("Ignoring {:?} after close", inbound);
            return Ok(vec![]);
        }

        match inbound {
            Inbound::Peers(users) => {
                info!("Users in channel {}: {:?}", self.identity.channel(), users);
                Ok(vec![])
            }
            Inbound::PeerConnected(user) => {
                info!("{} joined", user);
                if user != self.identity.user()
                    && self.peer.is_none()
                    && self.state == NegotiationState::Idle
                {
                    self.initiate(&user)
                } else {
                    Ok(vec![])
                }
            }
            Inbound::PeerRemoved(user) => {
                info!("{} has left", user);
                if self.peer.as_deref() == Some(user.as_str()) {
                    self.close("peer left the channel");
                }
                Ok(vec![])
            }
            Inbound::Ignored(what) => {
                warn!("Ignoring {}", what);
                Ok(vec![])
            }
            Inbound::Message { from, message } => self.handle_message(from, message),
            Inbound::Malformed { from, error } => {
                if !self.is_from_peer(&from, error.what()) {
                    return Ok(vec![]);
                }
                Err(self.fail(error))
            }
        }
    }

    /// False for our own echoes and, once a peer is chosen, for anyone else.
    fn is_from_peer(&self, from: &str, kind: &str) -> bool {
        if from == self.identity.user() {
            return false;
        }
        match &self.peer {
            Some(peer) if peer != from => {
                warn!("Ignoring {} from {}, negotiating with {}", kind, from, peer);
                false
            }
            _ => true,
        }
    }

    fn handle_message(
        &mut self,
        from: String,
        message: PeerMessage,
    ) -> Result<Vec<Outgoing>, NegotiationError> {
        if !self.is_from_peer(&from, message.kind()) {
            return Ok(vec![]);
        }

        match message {
            PeerMessage::Offer { sdp } => self.accept_offer(from, SessionDescription::offer(sdp)),
            PeerMessage::Answer { sdp } => {
                self.accept_answer(SessionDescription::answer(sdp))?;
                Ok(vec![])
            }
            PeerMessage::Candidate(candidate) => {
                self.add_candidate(&from, candidate);
                Ok(vec![])
            }
            PeerMessage::Bye => {
                info!("{} hung up", from);
                self.close("bye received");
                Ok(vec![])
            }
        }
    }

    fn accept_offer(
        &mut self,
        from: String,
        offer: SessionDescription,
    ) -> Result<Vec<Outgoing>, NegotiationError> {
        if self.state != NegotiationState::Idle {
            return Err(self.fail(NegotiationError::OutOfOrder {
                what: "offer",
                state: self.state.to_string(),
            }));
        }

        info!("Received an offer from {}", from);
        self.log_description("Remote", &offer);
        self.peer = Some(from.clone());
        self.set_state(NegotiationState::OfferReceived);

        let answer = match self.engine.accept_offer(&offer) {
            Ok(answer) => answer,
            Err(e) => return Err(self.fail(e)),
        };
        self.remote_description_set = true;
        self.set_state(NegotiationState::AnswerCreated);
        self.drain_buffered();

        self.log_description("Local", &answer);
        let out = self.emit_description(&from, answer);
        self.set_state(NegotiationState::AnswerSent);
        Ok(out)
    }

    fn accept_answer(&mut self, answer: SessionDescription) -> Result<(), NegotiationError> {
        if self.state != NegotiationState::OfferSent {
            return Err(self.fail(NegotiationError::OutOfOrder {
                what: "answer",
                state: self.state.to_string(),
            }));
        }

        info!("Received an answer");
        self.log_description("Remote", &answer);

        if let Err(e) = self.engine.accept_answer(&answer) {
            return Err(self.fail(e));
        }
        self.remote_description_set = true;
        self.set_state(NegotiationState::AnswerReceived);
        self.drain_buffered();
        Ok(())
    }

    /// Applies a remote candidate, or buffers it until the remote description
    /// is known. A candidate seen before is dropped.
    pub fn add_candidate(&mut self, from: &str, candidate: IceCandidate) {
        if self.is_closed() {
            return;
        }
        if candidate.is_end_of_candidates() {
            debug!("Remote end of candidates");
            return;
        }

        let key = candidate.key();
        let seen = self
            .buffered
            .iter()
            .any(|(sender, c)| sender == from && c.key() == key);
        if self.applied.contains(&key) || seen {
            debug!("Dropping duplicate candidate {}", candidate.candidate);
            return;
        }

        if !self.remote_description_set {
            debug!("Buffering candidate until the remote description is set");
            self.buffered.push((from.to_string(), candidate));
            return;
        }

        self.apply_candidate(candidate);
    }

    fn apply_candidate(&mut self, candidate: IceCandidate) {
        match self.engine.add_remote_candidate(&candidate) {
            Ok(()) => {
                debug!("Added remote candidate {}", candidate.candidate);
                self.applied.insert(candidate.key());
            }
            // A candidate the engine can't use (mDNS, TCP) doesn't end the session.
            Err(e) => warn!("Skipping remote candidate {}: {}", candidate.candidate, e),
        }
    }

    /// Applies the buffered candidates of the chosen peer and drops the rest.
    fn drain_buffered(&mut self) {
        let buffered = std::mem::take(&mut self.buffered);
        if !buffered.is_empty() {
            debug!("Draining {} buffered candidates", buffered.len());
        }
        for (from, candidate) in buffered {
            if self.peer.as_deref() == Some(from.as_str()) {
                self.apply_candidate(candidate);
            } else {
                debug!("Dropping buffered candidate from {}", from);
            }
        }
    }

    /// The description, followed by our own candidates.
    fn emit_description(&mut self, to: &str, description: SessionDescription) -> Vec<Outgoing> {
        let mut out = vec![Outgoing {
            to: to.to_string(),
            message: description.into(),
        }];
        out.extend(
            self.engine
                .take_local_candidates()
                .into_iter()
                .map(|c| Outgoing {
                    to: to.to_string(),
                    message: PeerMessage::Candidate(c),
                }),
        );
        out
    }

    /// The transport reported connectivity. Only completes a negotiation whose
    /// descriptions have both been applied.
    pub fn on_transport_connected(&mut self) {
        match self.state {
            NegotiationState::AnswerReceived | NegotiationState::AnswerSent => {
                info!("Connected to {}", self.peer.as_deref().unwrap_or("peer"));
                self.set_state(NegotiationState::Connected);
            }
            state => debug!("Transport connected while {}", state),
        }
    }

    /// Local hangup. Returns the `bye` for the peer, if there is one.
    pub fn hangup(&mut self) -> Option<Outgoing> {
        if self.is_closed() {
            return None;
        }
        let bye = self.peer.clone().map(|to| Outgoing {
            to,
            message: PeerMessage::Bye,
        });
        self.close("local hangup");
        bye
    }

    /// Moves to `Closed`, drops buffered candidates and releases the engine.
    /// Idempotent.
    pub fn close(&mut self, reason: &str) {
        if self.is_closed() {
            return;
        }
        info!("Closing session: {}", reason);
        self.buffered.clear();
        self.engine.close();
        self.set_state(NegotiationState::Closed);
    }

    fn fail(&mut self, e: NegotiationError) -> NegotiationError {
        self.close(&e.to_string());
        e
    }

    fn log_description(&self, side: &str, desc: &SessionDescription) {
        if self.verbosity.is_verbose() {
            debug!("{} {}:\n{}", side, desc.kind, desc.sdp);
        }
    }
}

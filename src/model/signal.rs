//! Signaling wire format
//!
//! Every websocket frame is a JSON envelope:
//!
//! ```text
//! {"t": "u", "m": {"f": "channel/user", "o": "message", "t": "peer"}, "p": {"msg": {...}}}
//! ```
//!
//! `m.o` is the objective. Presence notifications (`peers`, `peer_connected`,
//! `peer_removed`) come from the host; `message` carries a [`PeerMessage`]
//! relayed from another user.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NegotiationError;
use crate::model::description::{IceCandidate, SdpKind, SessionDescription};
use crate::model::identity::{user_of, ChannelIdentity};

/// Messages exchanged between the two peers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PeerMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate(IceCandidate),
    Bye,
}

impl PeerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::Offer { .. } => "offer",
            PeerMessage::Answer { .. } => "answer",
            PeerMessage::Candidate(_) => "candidate",
            PeerMessage::Bye => "bye",
        }
    }

    pub fn description(&self) -> Option<SessionDescription> {
        match self {
            PeerMessage::Offer { sdp } => Some(SessionDescription::offer(sdp.clone())),
            PeerMessage::Answer { sdp } => Some(SessionDescription::answer(sdp.clone())),
            _ => None,
        }
    }
}

impl From<SessionDescription> for PeerMessage {
    fn from(desc: SessionDescription) -> Self {
        match desc.kind {
            SdpKind::Offer => PeerMessage::Offer { sdp: desc.sdp },
            SdpKind::Answer => PeerMessage::Answer { sdp: desc.sdp },
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Users already present in the channel.
    Peers(Vec<String>),
    PeerConnected(String),
    PeerRemoved(String),
    Message { from: String, message: PeerMessage },
    /// An offer or answer from `from` that did not parse.
    Malformed { from: String, error: NegotiationError },
    /// Unknown objective or message type, or a candidate that did not
    /// parse. Kept for logging.
    Ignored(String),
}

#[derive(Serialize)]
struct Envelope<'a> {
    t: &'static str,
    m: Meta<'a>,
    p: Body<'a>,
}

#[derive(Serialize)]
struct Meta<'a> {
    f: String,
    o: &'static str,
    t: &'a str,
}

#[derive(Serialize)]
struct Body<'a> {
    msg: &'a PeerMessage,
}

/// Encodes `message` from `from` to the user `to`.
pub fn encode(
    from: &ChannelIdentity,
    to: &str,
    message: &PeerMessage,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Envelope {
        t: "u",
        m: Meta {
            f: from.to_string(),
            o: "message",
            t: to,
        },
        p: Body { msg: message },
    })
}

fn malformed(reason: impl Into<String>) -> NegotiationError {
    NegotiationError::Malformed {
        what: "signaling message",
        reason: reason.into(),
    }
}

/// Decodes one websocket text frame.
///
/// Only a frame that is not a signaling envelope at all is an error. Peer
/// messages that fail to parse are reported per sender, see [`Inbound`].
pub fn decode(text: &str) -> Result<Inbound, NegotiationError> {
    let value: Value = serde_json::from_str(text).map_err(|e| malformed(e.to_string()))?;

    let objective = value
        .pointer("/m/o")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing m.o"))?;
    let from = value
        .pointer("/m/f")
        .and_then(Value::as_str)
        .map(|f| user_of(f).to_string())
        .unwrap_or_default();

    match objective {
        "peers" => {
            let users = value
                .pointer("/p/users")
                .and_then(Value::as_array)
                .map(|users| {
                    users
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|u| user_of(u).to_string())
                        .collect()
                })
                .unwrap_or_default();
            Ok(Inbound::Peers(users))
        }
        "peer_connected" => Ok(Inbound::PeerConnected(from)),
        "peer_removed" => Ok(Inbound::PeerRemoved(from)),
        "message" => {
            let Some(msg) = value.pointer("/p/msg") else {
                return Ok(Inbound::Ignored(format!("message from {from} without p.msg")));
            };
            let Some(kind) = msg.get("type").and_then(Value::as_str) else {
                return Ok(Inbound::Ignored(format!("message from {from} without type")));
            };

            match (kind, PeerMessage::deserialize(msg)) {
                (_, Ok(message)) => Ok(Inbound::Message { from, message }),
                // A broken description has to reach the negotiator, which
                // decides whether it ends the session.
                ("offer" | "answer", Err(e)) => Ok(Inbound::Malformed {
                    from,
                    error: NegotiationError::Malformed {
                        what: if kind == "offer" { "offer" } else { "answer" },
                        reason: e.to_string(),
                    },
                }),
                ("candidate" | "bye", Err(e)) => Ok(Inbound::Ignored(format!(
                    "{kind} from {from}: {e}"
                ))),
                (other, Err(_)) => Ok(Inbound::Ignored(format!("unknown message type {other}"))),
            }
        }
        other => Ok(Inbound::Ignored(format!("unknown objective {other}"))),
    }
}

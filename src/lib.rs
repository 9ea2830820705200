//! A WebRTC peer that signals through a Xirsys deployment.
//!
//! ICE servers, a signaling host and a token are fetched over HTTP
//! ([`credentials`]), offers, answers and candidates are relayed over a
//! websocket ([`signaling`]), and the offer/answer exchange is driven by a
//! sans-IO state machine ([`negotiator`]) on top of `str0m` ([`engine`]).

pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod media;
pub mod model;
pub mod negotiator;
pub mod peer;
pub mod signaling;
pub mod util;

//! Data models for a signaling session
//!
//! This module contains the values exchanged between the credential fetcher,
//! the signaling channel, the negotiator and the media engine.

pub mod description;
pub mod ice;
pub mod identity;
pub mod payload;
pub mod signal;
pub mod tracks;

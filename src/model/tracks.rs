//! Media track management
//!
//! The video app negotiates a single video m-line. Its [`Mid`] is only known
//! once the SDP change that adds it has been applied, and the track can only
//! carry media once the remote side has answered.

use str0m::media::{Direction, MediaKind, Mid};

/// The negotiation state of the video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Track needs to be added in the next SDP offer
    ToOpen,
    /// Offered with the given Mid, waiting for the answer
    Negotiating(Mid),
    /// Negotiated and open for media
    Open(Mid),
}

/// The local video track and the direction it was negotiated with.
#[derive(Debug)]
pub struct VideoTrack {
    pub(crate) kind: MediaKind,
    pub(crate) direction: Direction,
    pub(crate) state: TrackState,
}

impl VideoTrack {
    /// A track that sends when there is a file to send, and always receives.
    pub fn new(has_source: bool) -> Self {
        let direction = if has_source {
            Direction::SendRecv
        } else {
            Direction::RecvOnly
        };
        Self {
            kind: MediaKind::Video,
            direction,
            state: TrackState::ToOpen,
        }
    }

    /// Gets the media ID (Mid) for this track, if assigned.
    pub fn mid(&self) -> Option<Mid> {
        match self.state {
            TrackState::ToOpen => None,
            TrackState::Negotiating(m) | TrackState::Open(m) => Some(m),
        }
    }

    /// The Mid to write media to, once negotiation completed.
    pub fn open_mid(&self) -> Option<Mid> {
        match self.state {
            TrackState::Open(m) => Some(m),
            _ => None,
        }
    }

    pub fn can_send(&self) -> bool {
        matches!(self.direction, Direction::SendRecv | Direction::SendOnly)
    }

    /// The answer arrived: a negotiating track becomes open.
    pub fn confirm(&mut self) {
        if let TrackState::Negotiating(m) = self.state {
            self.state = TrackState::Open(m);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_follows_source() {
        assert!(VideoTrack::new(true).can_send());
        assert!(!VideoTrack::new(false).can_send());
    }

    #[test]
    fn opens_only_after_confirm() {
        let mid: Mid = "0".into();
        let mut track = VideoTrack::new(true);
        assert_eq!(track.mid(), None);

        track.state = TrackState::Negotiating(mid);
        assert_eq!(track.mid(), Some(mid));
        assert_eq!(track.open_mid(), None);

        track.confirm();
        assert_eq!(track.open_mid(), Some(mid));
    }
}

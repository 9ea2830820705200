//! Session descriptions and ICE candidates exchanged over signaling

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => f.write_str("offer"),
            SdpKind::Answer => f.write_str("answer"),
        }
    }
}

/// An SDP blob with its role in the exchange. Relayed unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A single connectivity candidate, in browser `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }

    /// The candidate attribute value without the `a=` / `candidate:` prefixes,
    /// i.e. starting at the foundation.
    pub fn attribute(&self) -> &str {
        let line = self.candidate.trim();
        let line = line.strip_prefix("a=").unwrap_or(line);
        line.strip_prefix("candidate:").unwrap_or(line)
    }

    /// Identity used to deduplicate candidates that arrive more than once.
    pub fn key(&self) -> (String, Option<String>, Option<u16>) {
        (
            self.attribute().to_string(),
            self.sdp_mid.clone(),
            self.sdp_mline_index,
        )
    }

    /// An empty candidate signals end-of-candidates.
    pub fn is_end_of_candidates(&self) -> bool {
        self.attribute().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_prefixes() {
        let c = IceCandidate::new("a=candidate:1 1 udp 2130706431 10.0.0.2 5000 typ host");
        assert_eq!(c.attribute(), "1 1 udp 2130706431 10.0.0.2 5000 typ host");

        let c = IceCandidate::new("candidate:1 1 udp 2130706431 10.0.0.2 5000 typ host");
        assert_eq!(c.attribute(), "1 1 udp 2130706431 10.0.0.2 5000 typ host");
    }

    #[test]
    fn same_line_with_different_prefix_has_same_key() {
        let a = IceCandidate::new("candidate:1 1 udp 1 10.0.0.2 5000 typ host");
        let b = IceCandidate::new("a=candidate:1 1 udp 1 10.0.0.2 5000 typ host");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn browser_field_names() {
        let c: IceCandidate = serde_json::from_str(
            r#"{"candidate":"candidate:1 1 udp 1 10.0.0.2 5000 typ host","sdpMid":"0","sdpMLineIndex":0}"#,
        )
        .unwrap();
        assert_eq!(c.sdp_mid.as_deref(), Some("0"));
        assert_eq!(c.sdp_mline_index, Some(0));
        assert!(!c.is_end_of_candidates());
        assert!(IceCandidate::new("").is_end_of_candidates());
    }
}

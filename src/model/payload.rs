use chrono::{TimeDelta, TimeZone, Utc};

use bincode::config::{self, Configuration};
use bincode::error::{DecodeError, EncodeError};

const BINCODE_CONFIG: Configuration = config::standard();

/// A timestamped message sent over the data channel.
///
/// The sender stamps it on creation; an echoed payload keeps the original
/// stamp, so the latency seen by the sender is the round trip.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Payload {
    pub seq: u64,
    pub data: Vec<u8>,
    pub timestamp: i64,
}

impl Payload {
    pub fn new(seq: u64, data: &[u8]) -> Payload {
        Self {
            seq,
            data: data.to_vec(),
            timestamp: Utc::now().timestamp_nanos_opt().unwrap_or(0),
        }
    }

    pub fn data(&self) -> String {
        String::from_utf8_lossy(&self.data).to_string()
    }

    pub fn timestamp(&self) -> String {
        Utc.timestamp_nanos(self.timestamp).to_rfc3339()
    }

    pub fn latency(&self) -> TimeDelta {
        Utc::now() - Utc.timestamp_nanos(self.timestamp)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, EncodeError> {
        bincode::encode_to_vec(self, BINCODE_CONFIG)
    }

    /// Deserialize from received bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (payload, _): (Payload, usize) = bincode::decode_from_slice(bytes, BINCODE_CONFIG)?;
        Ok(payload)
    }
}

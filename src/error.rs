//! Error types for a signaling session.
//!
//! Each component has its own error enum. [`SessionError`] collects them so the
//! peer loop can propagate any of them to the CLI with `?`.

use thiserror::Error;

/// Invalid command line values, caught before any I/O.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The base URL is not an http(s) URL
    #[error("invalid base url {0:?}: must start with http(s)")]
    InvalidUrl(String),

    /// Channel and user names are used as routing keys and cannot be empty
    #[error("{0} name must not be empty or contain '/'")]
    InvalidName(&'static str),
}

/// Failures talking to the `getice.php` / `gethost.php` / `gettoken.php` endpoints.
#[derive(Error, Debug)]
pub enum CredentialFetchError {
    /// Transport-level failure, the endpoint could not be reached
    #[error("request to {endpoint} failed")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with a non-success HTTP status
    #[error("{endpoint} returned HTTP {status}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
    },

    /// The response body could not be parsed
    #[error("unparseable response from {endpoint}: {reason}")]
    Body { endpoint: String, reason: String },

    /// The response envelope carried a status other than "ok"
    #[error("{endpoint} rejected the request: {status}")]
    Rejected { endpoint: String, status: String },
}

/// The signaling websocket is gone. Terminal for the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("signaling channel closed: {reason}")]
pub struct ChannelClosedError {
    pub reason: String,
}

impl ChannelClosedError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A session description or candidate could not be applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// The description or candidate did not parse
    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    /// A description arrived in a state that cannot accept it
    #[error("unexpected {what} while {state}")]
    OutOfOrder { what: &'static str, state: String },

    /// The media engine refused the change
    #[error("media engine error: {0}")]
    Engine(String),
}

impl NegotiationError {
    /// What was being negotiated when this failed.
    pub fn what(&self) -> &'static str {
        match self {
            NegotiationError::Malformed { what, .. } | NegotiationError::OutOfOrder { what, .. } => {
                what
            }
            NegotiationError::Engine(_) => "media engine change",
        }
    }
}

/// Everything that can end a session abnormally.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Credentials(#[from] CredentialFetchError),

    #[error(transparent)]
    Channel(#[from] ChannelClosedError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// Local socket failure while driving the engine
    #[error("network error")]
    Network(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

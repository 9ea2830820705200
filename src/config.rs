//! Session configuration
//!
//! Everything a session needs is collected here once, from the CLI, and passed
//! by reference into the credential fetcher, the signaling channel and the
//! negotiator.

use std::{path::PathBuf, time::Duration};

use crate::{error::ConfigError, model::identity::ChannelIdentity};

/// Channel joined when none is given on the command line.
pub const DEFAULT_CHANNEL: &str = "examples";

/// Interval between websocket pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(20);

/// How much to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    #[default]
    Normal,
    /// Debug level, full SDP bodies and raw signaling frames.
    Verbose,
}

impl Verbosity {
    pub fn from_flag(verbose: bool) -> Self {
        if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    pub fn is_verbose(self) -> bool {
        self == Verbosity::Verbose
    }

    /// Default `EnvFilter` directive when `RUST_LOG` is not set.
    pub fn filter_directive(self) -> &'static str {
        match self {
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

/// Retry policy for each credential endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Total attempts per endpoint, at least 1.
    pub attempts: u32,
    /// Pause between two attempts.
    pub backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Which of the two applications is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppMode {
    /// A single data channel carrying timestamped payloads.
    DataChannel,
    /// A video track fed from an optional IVF file.
    Video { video_file: Option<PathBuf> },
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub identity: ChannelIdentity,
    pub verbosity: Verbosity,
    /// `None` disables websocket keepalive pings.
    pub ping_interval: Option<Duration>,
    pub fetch: FetchPolicy,
    /// Skip TLS certificate verification on the credential endpoints.
    pub insecure: bool,
    pub mode: AppMode,
}

impl SessionConfig {
    /// Validates the base URL and the identity.
    ///
    /// The base URL is the prefix under which `getice.php`, `gethost.php` and
    /// `gettoken.php` live. A trailing slash is dropped.
    pub fn new(
        base_url: &str,
        identity: ChannelIdentity,
        mode: AppMode,
    ) -> Result<Self, ConfigError> {
        if !base_url.starts_with("http") {
            return Err(ConfigError::InvalidUrl(base_url.to_string()));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            identity,
            verbosity: Verbosity::Normal,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            fetch: FetchPolicy::default(),
            insecure: false,
            mode,
        })
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_fetch_policy(mut self, fetch: FetchPolicy) -> Self {
        self.fetch = FetchPolicy {
            attempts: fetch.attempts.max(1),
            ..fetch
        };
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }
}

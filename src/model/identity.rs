use std::fmt;

use crate::error::ConfigError;

/// The `(channel, user)` pair a session is routed by on the signaling host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelIdentity {
    channel: String,
    user: String,
}

impl ChannelIdentity {
    pub fn new(channel: impl Into<String>, user: impl Into<String>) -> Result<Self, ConfigError> {
        let channel = channel.into();
        let user = user.into();

        if channel.is_empty() {
            return Err(ConfigError::InvalidName("channel"));
        }
        if user.is_empty() || user.contains('/') {
            return Err(ConfigError::InvalidName("user"));
        }

        Ok(Self { channel, user })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

/// Rendered the way the signaling host addresses senders: `channel/user`.
impl fmt::Display for ChannelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.user)
    }
}

/// The user name is the last path segment of a signaling address.
pub fn user_of(address: &str) -> &str {
    address.rsplit('/').next().unwrap_or(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_as_path() {
        let id = ChannelIdentity::new("examples", "bob").unwrap();
        assert_eq!(id.to_string(), "examples/bob");
    }

    #[test]
    fn rejects_empty_names() {
        assert_eq!(
            ChannelIdentity::new("", "bob"),
            Err(ConfigError::InvalidName("channel"))
        );
        assert_eq!(
            ChannelIdentity::new("examples", "a/b"),
            Err(ConfigError::InvalidName("user"))
        );
    }

    #[test]
    fn extracts_user_from_address() {
        assert_eq!(user_of("/examples/alice"), "alice");
        assert_eq!(user_of("alice"), "alice");
    }
}

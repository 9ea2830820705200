//! ICE server descriptors as returned by `getice.php`

use serde::{Deserialize, Serialize};

/// One STUN or TURN server, with credentials for TURN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IceServerDescriptor {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// The `v` value of a `getice.php` response.
#[derive(Debug, Deserialize)]
pub(crate) struct IceServerList {
    #[serde(rename = "iceServers")]
    pub ice_servers: Vec<RawIceServer>,
}

/// A server entry as the endpoint sends it. Older deployments use a single
/// `url`, newer ones `urls` as a string or a list.
#[derive(Debug, Deserialize)]
pub(crate) struct RawIceServer {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    urls: Option<OneOrMany>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    credential: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl RawIceServer {
    /// Normalises to a `urls` list, keeping the order received.
    /// Returns `None` for an entry without any URL.
    pub(crate) fn into_descriptor(self) -> Option<IceServerDescriptor> {
        let mut urls = Vec::new();
        if let Some(url) = self.url {
            urls.push(url);
        }
        match self.urls {
            Some(OneOrMany::One(u)) => urls.push(u),
            Some(OneOrMany::Many(us)) => urls.extend(us),
            None => {}
        }

        if urls.is_empty() {
            return None;
        }

        Some(IceServerDescriptor {
            urls,
            username: self.username,
            credential: self.credential,
        })
    }
}

impl IceServerDescriptor {
    /// True for `turn:` and `turns:` URLs, which need credentials.
    pub fn is_turn(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Vec<Option<IceServerDescriptor>> {
        let list: IceServerList = serde_json::from_str(json).unwrap();
        list.ice_servers
            .into_iter()
            .map(RawIceServer::into_descriptor)
            .collect()
    }

    #[test]
    fn maps_url_and_urls_alike() {
        let parsed = parse(
            r#"{"iceServers":[
                {"url":"stun:stun.example.com"},
                {"urls":"turn:1.2.3.4:3478","username":"u","credential":"c"},
                {"urls":["turn:1.2.3.4:3478?transport=udp","turns:1.2.3.4:5349"]}
            ]}"#,
        );

        let urls: Vec<Vec<String>> = parsed.into_iter().map(|d| d.unwrap().urls).collect();
        assert_eq!(
            urls,
            vec![
                vec!["stun:stun.example.com".to_string()],
                vec!["turn:1.2.3.4:3478".to_string()],
                vec![
                    "turn:1.2.3.4:3478?transport=udp".to_string(),
                    "turns:1.2.3.4:5349".to_string()
                ],
            ]
        );
    }

    #[test]
    fn entry_without_url_is_rejected() {
        let parsed = parse(r#"{"iceServers":[{"username":"u"}]}"#);
        assert_eq!(parsed, vec![None]);
    }

    #[test]
    fn detects_turn() {
        let parsed = parse(r#"{"iceServers":[{"url":"turn:1.2.3.4:3478"},{"url":"stun:x"}]}"#);
        let turn: Vec<bool> = parsed.iter().map(|d| d.as_ref().unwrap().is_turn()).collect();
        assert_eq!(turn, vec![true, false]);
    }
}

//! Credential fetcher
//!
//! Talks to the three endpoints of a Xirsys "getting started" deployment:
//! `getice.php` for the ICE servers, `gettoken.php` for a signaling token and
//! `gethost.php` for the websocket host. All three answer with a JSON envelope
//! `{"s": "ok", "v": ...}`.

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, info, warn};

use crate::config::{FetchPolicy, SessionConfig, Verbosity};
use crate::error::CredentialFetchError;
use crate::model::ice::{IceServerDescriptor, IceServerList};
use crate::model::identity::ChannelIdentity;

/// Access token for the signaling host. Moved into
/// [`SignalingChannel::open`](crate::signaling::SignalingChannel::open), so it
/// is used once. It can not be copied:
///
/// ```compile_fail
/// let token = xirsys_rtc::credentials::SignalingToken::new("abc123");
/// let again = token.clone();
/// ```
#[derive(PartialEq, Eq)]
pub struct SignalingToken(String);

impl SignalingToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Tokens are credentials, keep them out of the logs unless asked for.
impl fmt::Debug for SignalingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignalingToken({} chars)", self.0.len())
    }
}

/// Everything needed to start signaling.
#[derive(Debug)]
pub struct Credentials {
    pub ice_servers: Vec<IceServerDescriptor>,
    pub host: String,
    pub token: SignalingToken,
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    s: Option<String>,
    v: T,
}

pub struct CredentialFetcher {
    client: reqwest::Client,
    base_url: String,
    identity: ChannelIdentity,
    policy: FetchPolicy,
    verbosity: Verbosity,
}

impl CredentialFetcher {
    pub fn new(config: &SessionConfig) -> Result<Self, CredentialFetchError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|source| CredentialFetchError::Http {
                endpoint: config.base_url.clone(),
                source,
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            identity: config.identity.clone(),
            policy: config.fetch,
            verbosity: config.verbosity,
        })
    }

    /// Fetches ICE servers, token and host, in that order.
    pub async fn fetch(&self) -> Result<Credentials, CredentialFetchError> {
        info!(
            "Getting ICE servers and a token as {} from {}",
            self.identity.user(),
            self.base_url
        );

        let ice_servers = self.ice_servers().await?;
        let token = self.token().await?;
        let host = self.host().await?;

        Ok(Credentials {
            ice_servers,
            host,
            token,
        })
    }

    pub async fn ice_servers(&self) -> Result<Vec<IceServerDescriptor>, CredentialFetchError> {
        let endpoint = "getice.php";
        let list: IceServerList = self
            .post(endpoint, &[("channel", self.identity.channel())])
            .await?;

        let servers = list
            .ice_servers
            .into_iter()
            .map(|raw| raw.into_descriptor())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| CredentialFetchError::Body {
                endpoint: endpoint.to_string(),
                reason: "ICE server entry without url".to_string(),
            })?;

        for server in &servers {
            debug!("Retrieved ICE server: {:?}", server.urls);
        }
        Ok(servers)
    }

    pub async fn token(&self) -> Result<SignalingToken, CredentialFetchError> {
        let token: String = self
            .post(
                "gettoken.php",
                &[
                    ("username", self.identity.user()),
                    ("channel", self.identity.channel()),
                ],
            )
            .await?;

        if self.verbosity.is_verbose() {
            debug!("Retrieved a token: {}", token);
        } else {
            debug!("Retrieved a token");
        }
        Ok(SignalingToken::new(token))
    }

    pub async fn host(&self) -> Result<String, CredentialFetchError> {
        let host: String = self
            .post(
                "gethost.php",
                &[
                    ("username", self.identity.user()),
                    ("channel", self.identity.channel()),
                ],
            )
            .await?;

        debug!("Retrieved a host: {}", host);
        Ok(host)
    }

    /// One endpoint, retried according to the fetch policy.
    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        form: &[(&str, &str)],
    ) -> Result<T, CredentialFetchError> {
        let mut attempt = 1;
        loop {
            match self.post_once(endpoint, form).await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.policy.attempts && is_transient(&e) => {
                    warn!(
                        "Attempt {}/{} on {} failed: {}",
                        attempt, self.policy.attempts, endpoint, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.policy.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        form: &[(&str, &str)],
    ) -> Result<T, CredentialFetchError> {
        let url = format!("{}/{}", self.base_url, endpoint);

        let response = self
            .client
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|source| CredentialFetchError::Http {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialFetchError::Status {
                endpoint: endpoint.to_string(),
                status,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| CredentialFetchError::Http {
                endpoint: endpoint.to_string(),
                source,
            })?;

        if self.verbosity.is_verbose() {
            debug!("{} responded: {}", endpoint, body);
        }

        parse_envelope(endpoint, &body)
    }
}

fn parse_envelope<T: DeserializeOwned>(
    endpoint: &str,
    body: &str,
) -> Result<T, CredentialFetchError> {
    let envelope: Envelope<serde_json::Value> =
        serde_json::from_str(body).map_err(|e| CredentialFetchError::Body {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

    if let Some(status) = envelope.s.filter(|s| s != "ok") {
        return Err(CredentialFetchError::Rejected {
            endpoint: endpoint.to_string(),
            status: format!("{status}: {}", envelope.v),
        });
    }

    serde_json::from_value(envelope.v).map_err(|e| CredentialFetchError::Body {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}

/// Unreachable hosts and server errors are worth another attempt; a body the
/// endpoint deliberately sent is not.
fn is_transient(e: &CredentialFetchError) -> bool {
    match e {
        CredentialFetchError::Http { .. } => true,
        CredentialFetchError::Status { status, .. } => status.is_server_error(),
        _ => false,
    }
}

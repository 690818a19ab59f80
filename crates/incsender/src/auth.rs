//! Access token lifecycle for the incident platform.
//!
//! The [`TokenManager`] owns the single cached [`Credential`]. It performs a
//! password grant when nothing is cached, a refresh grant once the cached
//! credential is older than [`REFRESH_AFTER_HOURS`], and otherwise hands out
//! the cached value without touching the network.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use notify::HttpTransport;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Port of the identity service on the platform host.
pub const TOKEN_PORT: u16 = 3334;

/// OAuth client id registered for API access.
pub const CLIENT_ID: &str = "mpx";

/// Scopes requested with every grant.
pub const SCOPE: &str = "offline_access mpx.api ptkb.api";

/// Age after which a cached credential is refreshed.
pub const REFRESH_AFTER_HOURS: i64 = 12;

/// Login material for the token endpoint.
#[derive(Clone)]
pub struct ClientCredentials {
    pub login: String,
    pub password: String,
    pub client_secret: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// A cached access credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub obtained_at: DateTime<Utc>,
}

impl Credential {
    /// Whether the credential is old enough to be refreshed at `now`.
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now - self.obtained_at > Duration::hours(REFRESH_AFTER_HOURS)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("obtained_at", &self.obtained_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

enum Grant {
    Password,
    Refresh(String),
}

/// Owner of the process-wide access credential.
pub struct TokenManager {
    token_url: String,
    credentials: ClientCredentials,
    transport: HttpTransport,
    cached: Option<Credential>,
}

impl TokenManager {
    #[must_use]
    pub fn new(
        token_url: impl Into<String>,
        credentials: ClientCredentials,
        transport: HttpTransport,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            credentials,
            transport,
            cached: None,
        }
    }

    /// Token endpoint URL for a platform host.
    #[must_use]
    pub fn token_url_for_host(host: &str) -> String {
        format!("https://{host}:{TOKEN_PORT}/connect/token")
    }

    #[must_use]
    pub fn cached(&self) -> Option<&Credential> {
        self.cached.as_ref()
    }

    /// Drop the cached credential so the next call performs a password grant.
    pub fn invalidate(&mut self) {
        if self.cached.take().is_some() {
            warn!("Cached access token invalidated");
        }
    }

    /// Return a valid credential, obtaining or refreshing it as needed.
    pub async fn obtain_or_refresh(&mut self) -> Result<&Credential> {
        self.obtain_or_refresh_at(Utc::now()).await
    }

    /// Same as [`obtain_or_refresh`](Self::obtain_or_refresh) with an explicit clock.
    pub async fn obtain_or_refresh_at(&mut self, now: DateTime<Utc>) -> Result<&Credential> {
        let grant = match &self.cached {
            None => Some(Grant::Password),
            Some(credential) if credential.needs_refresh(now) => {
                Some(match credential.refresh_token.clone() {
                    Some(refresh_token) => Grant::Refresh(refresh_token),
                    None => Grant::Password,
                })
            }
            Some(_) => None,
        };

        match grant {
            None => debug!("Token already obtained and valid"),
            Some(grant) => {
                let refreshing = matches!(grant, Grant::Refresh(_));
                match self.exchange(grant, now).await {
                    Ok(credential) => {
                        if refreshing {
                            info!(url = %self.token_url, "Token refreshed");
                        } else {
                            info!(url = %self.token_url, "Token fetched");
                        }
                        self.cached = Some(credential);
                    }
                    Err(e) => {
                        self.cached = None;
                        return Err(e);
                    }
                }
            }
        }

        self.cached
            .as_ref()
            .ok_or_else(|| Error::InvalidToken("no credential cached".to_string()))
    }

    async fn exchange(&self, grant: Grant, now: DateTime<Utc>) -> Result<Credential> {
        let creds = &self.credentials;
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", CLIENT_ID),
            ("client_secret", creds.client_secret.as_str()),
            ("scope", SCOPE),
            ("username", creds.login.as_str()),
            ("password", creds.password.as_str()),
        ];
        match &grant {
            Grant::Password => {
                form.push(("grant_type", "password"));
                form.push(("response_type", "code id_token token"));
            }
            Grant::Refresh(refresh_token) => {
                form.push(("grant_type", "refresh_token"));
                form.push(("refresh_token", refresh_token.as_str()));
            }
        }

        debug!(url = %self.token_url, "Requesting access token");

        let request = self.transport.client().post(&self.token_url).form(&form);
        let response = self.transport.execute(request).await.map_err(Error::Auth)?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidToken(e.to_string()))?;

        if body.access_token.is_empty() {
            return Err(Error::InvalidToken("empty access_token".to_string()));
        }

        Ok(Credential {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            token_type: body.token_type,
            expires_in: body.expires_in,
            obtained_at: now,
        })
    }
}

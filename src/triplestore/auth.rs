//! Per-request authentication for the HTTP triple store.
//!
//! Bearer tokens obtained through the OAuth2 client-credentials grant are
//! cached and refreshed `refresh_margin_secs` before they expire, so
//! callers never see an expired-token rejection in steady state.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::TripleStoreError;

use super::TripleStoreResult;

fn default_refresh_margin() -> u64 {
    60
}

/// How requests to the triple store authenticate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credentials {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    StaticBearer {
        token: String,
    },
    /// OAuth2 client-credentials grant.
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
        #[serde(default)]
        scope: Option<String>,
        #[serde(default = "default_refresh_margin")]
        refresh_margin_secs: u64,
    },
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant, margin: Duration) -> bool {
        self.expires_at > now + margin
    }
}

/// Produces the `Authorization` header for each request.
pub struct Authenticator {
    credentials: Credentials,
    agent: ureq::Agent,
    token: Mutex<Option<CachedToken>>,
}

impl Authenticator {
    pub fn new(credentials: Credentials, agent: ureq::Agent) -> Self {
        Self {
            credentials,
            agent,
            token: Mutex::new(None),
        }
    }

    /// The header value to send, if any.
    pub fn header(&self) -> TripleStoreResult<Option<String>> {
        match &self.credentials {
            Credentials::None => Ok(None),
            Credentials::Basic { username, password } => Ok(Some(format!(
                "Basic {}",
                STANDARD.encode(format!("{username}:{password}"))
            ))),
            Credentials::StaticBearer { token } => Ok(Some(format!("Bearer {token}"))),
            Credentials::ClientCredentials {
                refresh_margin_secs,
                ..
            } => {
                let margin = Duration::from_secs(*refresh_margin_secs);
                let mut cached = self.token.lock().map_err(|_| TripleStoreError::Auth {
                    message: "token cache lock poisoned".into(),
                })?;
                if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Instant::now(), margin))
                {
                    return Ok(Some(format!("Bearer {}", token.access_token)));
                }
                let token = self.fetch_token()?;
                let header = format!("Bearer {}", token.access_token);
                *cached = Some(token);
                Ok(Some(header))
            }
        }
    }

    /// Forget the cached token, e.g. after the store answered 401.
    /// Returns whether a retry with a new token could help.
    pub fn invalidate(&self) -> bool {
        if !matches!(self.credentials, Credentials::ClientCredentials { .. }) {
            return false;
        }
        if let Ok(mut cached) = self.token.lock() {
            *cached = None;
        }
        true
    }

    fn fetch_token(&self) -> TripleStoreResult<CachedToken> {
        let Credentials::ClientCredentials {
            token_url,
            client_id,
            client_secret,
            scope,
            ..
        } = &self.credentials
        else {
            return Err(TripleStoreError::Auth {
                message: "no token endpoint configured".into(),
            });
        };

        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope.as_str()));
        }

        let requested_at = Instant::now();
        let response = self
            .agent
            .post(token_url)
            .set("Accept", "application/json")
            .send_form(&form)
            .map_err(|e| TripleStoreError::Auth {
                message: match e {
                    ureq::Error::Status(code, _) => {
                        format!("token endpoint {token_url} returned status {code}")
                    }
                    ureq::Error::Transport(t) => format!("token endpoint {token_url}: {t}"),
                },
            })?;
        let body: TokenResponse = response.into_json().map_err(|e| TripleStoreError::Auth {
            message: format!("invalid token response: {e}"),
        })?;
        let lifetime = body
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        tracing::debug!(
            token_url = %token_url,
            expires_in_secs = lifetime.as_secs(),
            "fetched triple store access token"
        );
        Ok(CachedToken {
            access_token: body.access_token,
            expires_at: requested_at + lifetime,
        })
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.credentials {
            Credentials::None => "none",
            Credentials::Basic { .. } => "basic",
            Credentials::StaticBearer { .. } => "static_bearer",
            Credentials::ClientCredentials { .. } => "client_credentials",
        };
        f.debug_struct("Authenticator").field("kind", &kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> ureq::Agent {
        ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(200))
            .build()
    }

    #[test]
    fn basic_header() {
        let auth = Authenticator::new(
            Credentials::Basic {
                username: "admin".into(),
                password: "pw".into(),
            },
            agent(),
        );
        assert_eq!(auth.header().unwrap().unwrap(), "Basic YWRtaW46cHc=");
        assert!(!auth.invalidate());
    }

    #[test]
    fn static_bearer_and_none() {
        let auth = Authenticator::new(Credentials::StaticBearer { token: "t".into() }, agent());
        assert_eq!(auth.header().unwrap().unwrap(), "Bearer t");
        let none = Authenticator::new(Credentials::None, agent());
        assert!(none.header().unwrap().is_none());
    }

    #[test]
    fn cached_token_refreshes_before_expiry() {
        let now = Instant::now();
        let token = CachedToken {
            access_token: "x".into(),
            expires_at: now + Duration::from_secs(90),
        };
        assert!(token.is_fresh(now, Duration::from_secs(60)));
        assert!(!token.is_fresh(now + Duration::from_secs(40), Duration::from_secs(60)));
    }

    #[test]
    fn cached_token_is_reused() {
        let auth = Authenticator::new(
            Credentials::ClientCredentials {
                token_url: "http://127.0.0.1:9/token".into(),
                client_id: "c".into(),
                client_secret: "s".into(),
                scope: None,
                refresh_margin_secs: 60,
            },
            agent(),
        );
        *auth.token.lock().unwrap() = Some(CachedToken {
            access_token: "cached".into(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        });
        assert_eq!(auth.header().unwrap().unwrap(), "Bearer cached");
        assert!(auth.invalidate());
        // Endpoint is unreachable, so a refetch surfaces as an auth error.
        assert!(matches!(auth.header(), Err(TripleStoreError::Auth { .. })));
    }

    #[test]
    fn credentials_from_toml() {
        let creds: Credentials = toml::from_str(
            r#"
            kind = "client_credentials"
            token_url = "https://auth.example/token"
            client_id = "id"
            client_secret = "secret"
            "#,
        )
        .unwrap();
        match creds {
            Credentials::ClientCredentials {
                refresh_margin_secs,
                scope,
                ..
            } => {
                assert_eq!(refresh_margin_secs, 60);
                assert!(scope.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

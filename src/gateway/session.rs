//! Credential & session manager — OAuth client-credentials tokens.
//!
//! Tokens are cached per `(client_id, cluster_id)`. A cached token is served
//! until it comes within the refresh margin of its expiry. Refreshes are
//! single-flight: the first caller starts the exchange and every concurrent
//! caller awaits that same exchange, success or failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::types::{ClusterEndpoint, Credentials, SessionKey, SessionToken};
use crate::error::{ClientError, Result};

pub const DEFAULT_AUTHORIZATION_SERVER_URL: &str = "https://login.cloud.camunda.io/oauth/token";
pub const DEFAULT_TOKEN_AUDIENCE: &str = "zeebe.camunda.io";
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// TokenExchange
// ---------------------------------------------------------------------------

/// Performs one network token exchange.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, credentials: &Credentials) -> Result<SessionToken>;
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    audience: &'a str,
    grant_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Client-credentials exchange against an OAuth authorization server.
pub struct OAuthTokenExchange {
    http: reqwest::Client,
    url: String,
    audience: String,
}

impl OAuthTokenExchange {
    pub fn new(url: impl Into<String>, audience: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::TransientAuth(format!("building http client: {}", e)))?;
        Ok(Self {
            http,
            url: url.into(),
            audience: audience.into(),
        })
    }
}

#[async_trait]
impl TokenExchange for OAuthTokenExchange {
    async fn exchange(&self, credentials: &Credentials) -> Result<SessionToken> {
        let body = TokenRequest {
            client_id: &credentials.client_id,
            client_secret: &credentials.client_secret,
            audience: &self.audience,
            grant_type: "client_credentials",
        };

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::TransientAuth(format!("token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if matches!(status.as_u16(), 400 | 401 | 403) {
            let detail = response.text().await.unwrap_or_default();
            return Err(ClientError::Auth(format!(
                "token endpoint returned {}: {}",
                status,
                truncate(&detail, 200)
            )));
        }
        if !status.is_success() {
            return Err(ClientError::TransientAuth(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ClientError::TransientAuth(format!("unreadable token response: {}", e)))?;

        let expiry = token_expiry(token.expires_in)?;
        Ok(SessionToken::new(token.access_token, expiry))
    }
}

fn token_expiry(expires_in: u64) -> Result<Instant> {
    Instant::now()
        .checked_add(Duration::from_secs(expires_in))
        .ok_or_else(|| {
            ClientError::TransientAuth(format!(
                "token endpoint returned unusable expires_in {}",
                expires_in
            ))
        })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

type SharedExchange = Shared<BoxFuture<'static, Result<SessionToken>>>;

#[derive(Default)]
struct TokenSlot {
    token: Option<SessionToken>,
    inflight: Option<(u64, SharedExchange)>,
    generation: u64,
}

/// Owns token acquisition, caching and refresh.
pub struct SessionManager {
    exchange: Arc<dyn TokenExchange>,
    refresh_margin: Duration,
    slots: Mutex<HashMap<SessionKey, TokenSlot>>,
}

impl SessionManager {
    pub fn new(exchange: Arc<dyn TokenExchange>, refresh_margin: Duration) -> Self {
        Self {
            exchange,
            refresh_margin,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return a token valid beyond the refresh margin, exchanging if needed.
    pub async fn acquire_token(
        &self,
        credentials: &Credentials,
        endpoint: &ClusterEndpoint,
    ) -> Result<SessionToken> {
        let key = SessionKey::new(credentials, endpoint);

        let (generation, pending) = {
            let mut slots = self.slots.lock().await;
            let slot = slots.entry(key.clone()).or_default();

            if let Some(token) = &slot.token {
                if !token.needs_refresh(self.refresh_margin) {
                    return Ok(token.clone());
                }
            }

            match &slot.inflight {
                Some((generation, shared)) => {
                    tracing::debug!(
                        client_id = %key.client_id,
                        cluster_id = %key.cluster_id,
                        "joining in-flight token exchange"
                    );
                    (*generation, shared.clone())
                }
                None => {
                    slot.generation += 1;
                    let exchange = Arc::clone(&self.exchange);
                    let credentials = credentials.clone();
                    let shared = async move { exchange.exchange(&credentials).await }
                        .boxed()
                        .shared();
                    slot.inflight = Some((slot.generation, shared.clone()));
                    tracing::debug!(
                        client_id = %key.client_id,
                        cluster_id = %key.cluster_id,
                        "starting token exchange"
                    );
                    (slot.generation, shared)
                }
            }
        };

        let result = pending.await;

        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(&key) {
            if matches!(&slot.inflight, Some((g, _)) if *g == generation) {
                slot.inflight = None;
                match &result {
                    Ok(token) => slot.token = Some(token.clone()),
                    Err(e) => tracing::warn!(
                        client_id = %key.client_id,
                        cluster_id = %key.cluster_id,
                        error = %e,
                        "token exchange failed"
                    ),
                }
            }
        }

        result
    }

    /// Drop the cached token if it is still the one the gateway rejected.
    pub async fn invalidate(
        &self,
        credentials: &Credentials,
        endpoint: &ClusterEndpoint,
        rejected: &SessionToken,
    ) {
        let key = SessionKey::new(credentials, endpoint);
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(&key) {
            if slot.token.as_ref() == Some(rejected) {
                slot.token = None;
                tracing::info!(
                    client_id = %key.client_id,
                    cluster_id = %key.cluster_id,
                    "cached token invalidated"
                );
            }
        }
    }

    /// Forget every cached token.
    pub async fn clear(&self) {
        self.slots.lock().await.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

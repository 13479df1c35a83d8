//! Identity provider adapter.
//!
//! This module defines the `IdentityProvider` trait the rest of the app is
//! written against, and `IdentityClient`, the HTTP implementation speaking
//! the identity service's token-grant endpoints.
//!
//! The adapter owns its own provider session (access token, refresh token,
//! expiry) and persists it under the `"identity"` storage key so the
//! provider can report a principal after a restart. State and token changes
//! fan out over broadcast channels; dropping a receiver unsubscribes it.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::auth::store::SessionStore;

// ============================================================================
// Constants
// ============================================================================

/// Storage key for the adapter's own persisted state.
const IDENTITY_KEY: &str = "identity";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Treat an access token as stale this many seconds before its expiry,
/// so a token handed out by `refresh_token` survives the request it is for.
const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

/// Broadcast capacity for change notifications. Consumers drain promptly;
/// lagging receivers skip to the newest event.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

// ============================================================================
// Types
// ============================================================================

/// The identity the provider reports for the signed-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: Option<String>,
}

/// One notification on the state-changed or token-changed channel.
/// `principal` is `None` when no user is signed in.
#[derive(Debug, Clone)]
pub struct AuthChange {
    pub principal: Option<Principal>,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    /// Rejected credentials. The message is the provider's own and is
    /// shown to the operator as-is.
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("No signed-in principal")]
    NotSignedIn,
}

/// Seam between the app and the identity service. The controller and the
/// request pipeline only ever see this trait; tests substitute their own
/// implementations.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify credentials and establish a provider session.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Principal, ProviderError>;

    /// End the provider session. Local state is cleared and a signed-out
    /// notification is emitted even when the remote call fails.
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Current access token for `principal`. With `force` false a cached
    /// unexpired token is returned without network I/O; `force` true (or a
    /// stale cache) performs a refresh grant. A refresh that rotates the
    /// token emits on the token-changed channel.
    async fn refresh_token(
        &self,
        principal: &Principal,
        force: bool,
    ) -> Result<String, ProviderError>;

    /// Continuous sign-in/sign-out notifications. Drop the receiver to
    /// unsubscribe.
    fn subscribe_state_changes(&self) -> broadcast::Receiver<AuthChange>;

    /// Continuous token rotation notifications. Drop the receiver to
    /// unsubscribe.
    fn subscribe_token_changes(&self) -> broadcast::Receiver<AuthChange>;

    /// Replay the current principal (or its absence) to subscribers.
    /// Called once at startup after the subscriptions are in place.
    async fn resume(&self);
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Adapter-internal session with the identity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProviderSession {
    principal: Principal,
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl ProviderSession {
    fn is_fresh(&self) -> bool {
        Utc::now() + Duration::seconds(TOKEN_EXPIRY_SKEW_SECS) < self.expires_at
    }
}

/// HTTP client for the identity service's password and refresh-token grants.
pub struct IdentityClient {
    client: Client,
    identity_url: String,
    api_key: Option<String>,
    store: SessionStore,
    session: Mutex<Option<ProviderSession>>,
    state_tx: broadcast::Sender<AuthChange>,
    token_tx: broadcast::Sender<AuthChange>,
}

impl IdentityClient {
    pub fn new(
        identity_url: String,
        api_key: Option<String>,
        store: SessionStore,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let session = store.read(IDENTITY_KEY).and_then(|contents| {
            match serde_json::from_str::<ProviderSession>(&contents) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(error = %e, "Failed to parse persisted provider session");
                    None
                }
            }
        });

        let (state_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (token_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            identity_url,
            api_key,
            store,
            session: Mutex::new(session),
            state_tx,
            token_tx,
        })
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: &serde_json::Value,
    ) -> Result<TokenResponse, ProviderError> {
        let url = format!("{}/token?grant_type={}", self.identity_url, grant_type);

        let mut request = self.client.post(&url).json(body);
        if let Some(ref key) = self.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()));
        }

        let text = response.text().await.unwrap_or_default();
        let message = error_message(&text, &format!("token grant returned {}", status));
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            Err(ProviderError::InvalidCredentials(message))
        } else {
            Err(ProviderError::Provider(message))
        }
    }

    /// Store a grant response as the current provider session.
    /// Returns the principal, the access token, and whether the access
    /// token differs from the previous one.
    async fn install(&self, token: TokenResponse) -> (Principal, String, bool) {
        let principal = Principal {
            uid: token.user.id,
            email: token.user.email,
            display_name: token.user.display_name,
            role: token.user.role,
        };
        let next = ProviderSession {
            principal: principal.clone(),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        };

        let rotated = {
            let mut guard = self.session.lock().await;
            let rotated = guard
                .as_ref()
                .map(|s| s.access_token != next.access_token)
                .unwrap_or(false);
            *guard = Some(next.clone());
            rotated
        };

        match serde_json::to_string_pretty(&next) {
            Ok(contents) => self.store.save(IDENTITY_KEY, &contents),
            Err(e) => warn!(error = %e, "Failed to serialize provider session"),
        }

        (principal, next.access_token, rotated)
    }
}

#[async_trait]
impl IdentityProvider for IdentityClient {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Principal, ProviderError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let token = self.token_grant("password", &body).await?;
        let (principal, _, _) = self.install(token).await;

        debug!(uid = %principal.uid, "Signed in with password grant");
        let change = AuthChange {
            principal: Some(principal.clone()),
        };
        let _ = self.state_tx.send(change.clone());
        let _ = self.token_tx.send(change);

        Ok(principal)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let access = {
            let mut guard = self.session.lock().await;
            let access = guard.as_ref().map(|s| s.access_token.clone());
            *guard = None;
            access
        };
        self.store.delete(IDENTITY_KEY);

        let change = AuthChange { principal: None };
        let _ = self.state_tx.send(change.clone());
        let _ = self.token_tx.send(change);

        // Local state is already gone; the remote call is best effort and
        // its failure is the caller's to log.
        let Some(access) = access else {
            return Ok(());
        };

        let url = format!("{}/logout", self.identity_url);
        let mut request = self.client.post(&url).bearer_auth(&access);
        if let Some(ref key) = self.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Provider(error_message(
                &text,
                &format!("logout returned {}", status),
            )));
        }
        Ok(())
    }

    async fn refresh_token(
        &self,
        principal: &Principal,
        force: bool,
    ) -> Result<String, ProviderError> {
        let (refresh, cached) = {
            let guard = self.session.lock().await;
            match guard.as_ref() {
                Some(s) if s.principal.uid == principal.uid => {
                    let cached = if !force && s.is_fresh() {
                        Some(s.access_token.clone())
                    } else {
                        None
                    };
                    (s.refresh_token.clone(), cached)
                }
                _ => return Err(ProviderError::NotSignedIn),
            }
        };

        if let Some(token) = cached {
            return Ok(token);
        }

        let body = serde_json::json!({ "refresh_token": refresh });
        let token = self.token_grant("refresh_token", &body).await?;
        let (principal, access, rotated) = self.install(token).await;

        if rotated {
            debug!(uid = %principal.uid, "Access token rotated");
            let _ = self.token_tx.send(AuthChange {
                principal: Some(principal),
            });
        }
        Ok(access)
    }

    fn subscribe_state_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.state_tx.subscribe()
    }

    fn subscribe_token_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.token_tx.subscribe()
    }

    async fn resume(&self) {
        let principal = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.principal.clone());
        debug!(signed_in = principal.is_some(), "Replaying provider auth state");
        let _ = self.state_tx.send(AuthChange { principal });
    }
}

/// Pull a human-readable message out of a provider failure body.
fn error_message(body: &str, fallback: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error_description: Option<String>,
        #[serde(default)]
        message: Option<String>,
    }

    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error_description.or(b.message))
        .unwrap_or_else(|| fallback.to_string())
}

// Internal wire types for the token endpoints

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

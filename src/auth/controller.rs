//! Auth state controller.
//!
//! Single owner of the authentication state. The controller subscribes to
//! the provider's state-changed and token-changed channels plus the request
//! pipeline's revocation channel, folds every notification into one
//! `AuthState` published over a watch channel, and keeps the persisted
//! session record in step. `sign_in`, `sign_up`, and `sign_out` are the
//! only entry points that drive the lifecycle from the UI side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, Profile, Registration, SessionRevoked};
use crate::auth::provider::{AuthChange, IdentityProvider, ProviderError};
use crate::auth::session::Session;
use crate::auth::store::SessionStore;

/// Shown when a failure carries no message worth repeating.
const GENERIC_AUTH_ERROR: &str = "An unexpected error occurred";

/// Authentication state of the app.
///
/// `Initializing` lasts from startup until either the stored session is
/// restored or the provider reports in; the restored value is only a
/// placeholder and the provider's live notification supersedes it.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Initializing,
    Unauthenticated,
    Authenticated(Session),
}

impl AuthState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }
}

struct ControllerInner {
    provider: Arc<dyn IdentityProvider>,
    store: SessionStore,
    api: ApiClient,
    state_tx: watch::Sender<AuthState>,
    error_tx: watch::Sender<Option<String>>,
    /// Set once the first provider notification has been handled; from then
    /// on the startup restore path must not touch the state.
    provider_confirmed: AtomicBool,
}

/// Cheaply cloneable handle to the controller.
#[derive(Clone)]
pub struct AuthController {
    inner: Arc<ControllerInner>,
}

impl AuthController {
    /// Wire up the controller and start its event loop.
    ///
    /// Subscriptions are taken before the stored session is restored and
    /// before the provider replays its state, so no notification can slip
    /// past the loop.
    pub async fn start(
        provider: Arc<dyn IdentityProvider>,
        store: SessionStore,
        api: ApiClient,
        revoked_rx: mpsc::UnboundedReceiver<SessionRevoked>,
    ) -> Self {
        let (state_tx, _) = watch::channel(AuthState::Initializing);
        let (error_tx, _) = watch::channel(None);

        let state_changes = provider.subscribe_state_changes();
        let token_changes = provider.subscribe_token_changes();

        let inner = Arc::new(ControllerInner {
            provider,
            store,
            api,
            state_tx,
            error_tx,
            provider_confirmed: AtomicBool::new(false),
        });

        tokio::spawn(Self::run_events(
            inner.clone(),
            state_changes,
            token_changes,
            revoked_rx,
        ));

        // Restore is a placeholder against a login-screen flash; whatever
        // the provider says next wins.
        if let Some(session) = inner.store.load_session() {
            inner.apply_restored(session);
        }
        inner.provider.resume().await;

        Self { inner }
    }

    // =========================================================================
    // State access
    // =========================================================================

    pub fn state(&self) -> AuthState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state_tx.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.state_tx.borrow().session().cloned()
    }

    /// Most recent auth failure message. Stays until the consumer clears
    /// it or the next failure overwrites it.
    pub fn last_error(&self) -> Option<String> {
        self.inner.error_tx.borrow().clone()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<Option<String>> {
        self.inner.error_tx.subscribe()
    }

    pub fn clear_error(&self) {
        self.inner.error_tx.send_replace(None);
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Sign in with email and password. Failure never escapes here: it
    /// lands in the error field and the state stays where it was. Returns
    /// whether a session was established.
    pub async fn sign_in(&self, email: &str, password: &str) -> bool {
        let inner = &self.inner;
        // Each attempt starts with a clean error field.
        inner.error_tx.send_replace(None);
        let principal = match inner.provider.sign_in_with_password(email, password).await {
            Ok(principal) => principal,
            Err(e) => {
                warn!(error = %e, "Sign-in failed");
                inner.error_tx.send_replace(Some(Self::user_message(&e)));
                return false;
            }
        };

        // Fresh token up front so the first authenticated request does not
        // start with a stale one.
        match inner.provider.refresh_token(&principal, true).await {
            Ok(token) => {
                let current = inner.state_tx.borrow().session().cloned();
                let session = match current {
                    Some(ref existing) => existing.rotated(&principal, token),
                    None => Session::from_principal(&principal, token),
                };
                inner.store.save_session(&session);
                info!(uid = %session.uid, "Signed in");
                inner
                    .state_tx
                    .send_replace(AuthState::Authenticated(session));
                true
            }
            Err(e) => {
                error!(error = %e, "Token fetch after sign-in failed");
                inner.error_tx.send_replace(Some(Self::user_message(&e)));
                false
            }
        }
    }

    /// Create an account through the backend. Never establishes a session;
    /// returns whether registration succeeded so the UI can move on, with
    /// failure detail in the error field.
    pub async fn sign_up(&self, registration: &Registration) -> bool {
        self.inner.error_tx.send_replace(None);
        match self.inner.api.register(registration).await {
            Ok(()) => {
                info!(email = %registration.email, "Account registered");
                true
            }
            Err(e) => {
                warn!(error = %e, "Registration failed");
                self.inner.error_tx.send_replace(Some(e.user_message()));
                false
            }
        }
    }

    /// Sign out. The provider call is best effort; the local session is
    /// cleared no matter what.
    pub async fn sign_out(&self) {
        if let Err(e) = self.inner.provider.sign_out().await {
            warn!(error = %e, "Provider sign-out failed, clearing local session anyway");
        }
        self.inner.store.clear_session();
        self.inner
            .state_tx
            .send_replace(AuthState::Unauthenticated);
        info!("Signed out");
    }

    /// Fetch the backend profile and fold its role label into the session.
    pub async fn refresh_profile(&self) -> Option<Profile> {
        match self.inner.api.fetch_profile().await {
            Ok(profile) => {
                self.inner.apply_profile(&profile);
                Some(profile)
            }
            Err(e) => {
                warn!(error = %e, "Profile refresh failed");
                None
            }
        }
    }

    fn user_message(error: &ProviderError) -> String {
        match error {
            ProviderError::InvalidCredentials(message) | ProviderError::Provider(message) => {
                message.clone()
            }
            ProviderError::Network(_) => {
                "Unable to connect to the identity service. Check your connection.".to_string()
            }
            _ => GENERIC_AUTH_ERROR.to_string(),
        }
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Single consumer of all auth notifications. One event is handled to
    /// completion, persistence included, before the next is received.
    async fn run_events(
        inner: Arc<ControllerInner>,
        mut state_changes: broadcast::Receiver<AuthChange>,
        mut token_changes: broadcast::Receiver<AuthChange>,
        mut revoked_rx: mpsc::UnboundedReceiver<SessionRevoked>,
    ) {
        loop {
            tokio::select! {
                change = state_changes.recv() => match change {
                    Ok(change) => inner.handle_change(change).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Auth state notifications lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                change = token_changes.recv() => match change {
                    Ok(change) => inner.handle_change(change).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Token notifications lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                revoked = revoked_rx.recv() => match revoked {
                    Some(SessionRevoked) => inner.handle_revoked(),
                    None => break,
                },
            }
        }
        debug!("Auth event loop stopped");
    }
}

impl ControllerInner {
    /// Apply the restored session, but only while nothing better is known:
    /// still `Initializing` and no provider notification handled yet.
    fn apply_restored(&self, session: Session) {
        if self.provider_confirmed.load(Ordering::SeqCst) {
            return;
        }
        let applied = self.state_tx.send_if_modified(|state| {
            if matches!(state, AuthState::Initializing) {
                *state = AuthState::Authenticated(session.clone());
                true
            } else {
                false
            }
        });
        if applied {
            debug!(uid = %session.uid, "Restored session from storage");
        }
    }

    /// Shared handler for state-changed and token-changed notifications.
    /// Idempotent: replaying a notification rebuilds the same session.
    async fn handle_change(&self, change: AuthChange) {
        self.provider_confirmed.store(true, Ordering::SeqCst);

        let Some(principal) = change.principal else {
            debug!("Provider reports signed out");
            self.store.clear_session();
            self.state_tx.send_replace(AuthState::Unauthenticated);
            return;
        };

        // Unforced fetch: a cached fresh token is reused, so the burst of
        // events around a sign-in converges instead of looping.
        match self.provider.refresh_token(&principal, false).await {
            Ok(token) => {
                let current = self.state_tx.borrow().session().cloned();
                let session = match current {
                    Some(ref existing) => existing.rotated(&principal, token),
                    None => Session::from_principal(&principal, token),
                };
                self.store.save_session(&session);
                self.state_tx
                    .send_replace(AuthState::Authenticated(session));
            }
            Err(e) => {
                error!(error = %e, uid = %principal.uid, "Failed to obtain token for principal");
            }
        }
    }

    fn handle_revoked(&self) {
        info!("Backend revoked the session, signing out locally");
        self.store.clear_session();
        self.state_tx.send_replace(AuthState::Unauthenticated);
    }

    /// Fold a freshly fetched profile role into the session, persisting
    /// only when the label actually changes.
    fn apply_profile(&self, profile: &Profile) {
        let mut persisted = None;
        self.state_tx.send_if_modified(|state| {
            if let AuthState::Authenticated(session) = state {
                if session.uid == profile.uid
                    && profile.role.is_some()
                    && session.role != profile.role
                {
                    session.role = profile.role.clone();
                    persisted = Some(session.clone());
                    return true;
                }
            }
            false
        });
        if let Some(session) = persisted {
            debug!(role = ?session.role, "Role label updated from profile");
            self.store.save_session(&session);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Authenticated HTTP pipeline for the dashboard backend.
//!
//! Every request reads the persisted session token and attaches it as a raw
//! `Authorization` header. A 401 triggers one forced token refresh and a
//! single resubmission; a 403 purges the stored session and notifies the
//! controller over the revocation channel before the error propagates.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::auth::provider::{IdentityProvider, Principal};
use crate::auth::store::SessionStore;

use super::ApiError;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Notice to the controller that the backend revoked the session.
#[derive(Debug, Clone, Copy)]
pub struct SessionRevoked;

/// Per-request bookkeeping. Each original request owns one, so the
/// retry-once cap holds even with concurrent requests in flight.
#[derive(Debug, Default)]
struct RequestContext {
    retried: bool,
}

/// Registration payload for `POST /auth/register`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_location: Option<String>,
}

/// Profile of the signed-in user as the backend sees it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Backend API client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    store: SessionStore,
    provider: Arc<dyn IdentityProvider>,
    revocations: mpsc::UnboundedSender<SessionRevoked>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        store: SessionStore,
        provider: Arc<dyn IdentityProvider>,
        revocations: mpsc::UnboundedSender<SessionRevoked>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
            provider,
            revocations,
        })
    }

    // ===== Backend operations =====

    /// Create an account. Success is a 2xx; the response body is not
    /// interpreted beyond being well-formed JSON.
    pub async fn register(&self, registration: &Registration) -> Result<(), ApiError> {
        let _: serde_json::Value = self.post("/auth/register", registration).await?;
        Ok(())
    }

    /// Fetch the signed-in user's profile.
    pub async fn fetch_profile(&self) -> Result<Profile, ApiError> {
        self.get("/auth/profile").await
    }

    // ===== Request pipeline =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send::<T, ()>(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(Method::POST, path, Some(body)).await
    }

    async fn send<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut token = self.store.stored_token();
        let mut ctx = RequestContext::default();

        loop {
            let mut request = self.client.request(method.clone(), &url);
            if let Some(ref t) = token {
                // Raw token, no scheme prefix: the backend expects the
                // header value to be the token itself.
                request = request.header(header::AUTHORIZATION, t.as_str());
            }
            if let Some(b) = body {
                request = request.json(b);
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_success() {
                return response
                    .json()
                    .await
                    .map_err(|e| ApiError::InvalidResponse(e.to_string()));
            }

            if status == StatusCode::UNAUTHORIZED && !ctx.retried {
                ctx.retried = true;
                if let Some(fresh) = self.replacement_token().await {
                    debug!(path, "Resubmitting with refreshed token");
                    token = Some(fresh);
                    continue;
                }
            }

            if status == StatusCode::FORBIDDEN {
                warn!(path, "Backend revoked the session, purging it");
                self.store.clear_session();
                let _ = self.revocations.send(SessionRevoked);
            }

            let text = response.text().await.unwrap_or_default();
            warn!(path, status = %status, "API request failed");
            return Err(ApiError::from_status(status, &text));
        }
    }

    /// Forced token refresh for the 401 retry path. `None` when there is no
    /// stored session to refresh for, or the provider cannot produce one;
    /// the original 401 then propagates.
    async fn replacement_token(&self) -> Option<String> {
        let session = self.store.load_session()?;
        let principal = Principal {
            uid: session.uid,
            email: session.email,
            display_name: session.name,
            role: session.role,
        };
        match self.provider.refresh_token(&principal, true).await {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "Token refresh failed during 401 retry");
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::provider::{AuthChange, ProviderError};
    use crate::auth::session::Session;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::broadcast;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    /// Provider stub that hands out queued refresh results and counts calls.
    struct StubProvider {
        refreshes: Mutex<Vec<Result<String, ProviderError>>>,
        refresh_calls: AtomicUsize,
        state_tx: broadcast::Sender<AuthChange>,
        token_tx: broadcast::Sender<AuthChange>,
    }

    impl StubProvider {
        fn new(refreshes: Vec<Result<String, ProviderError>>) -> Self {
            let (state_tx, _) = broadcast::channel(8);
            let (token_tx, _) = broadcast::channel(8);
            Self {
                refreshes: Mutex::new(refreshes),
                refresh_calls: AtomicUsize::new(0),
                state_tx,
                token_tx,
            }
        }

        fn refresh_call_count(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityProvider for StubProvider {
        async fn sign_in_with_password(
            &self,
            _email: &str,
            _password: &str,
        ) -> Result<Principal, ProviderError> {
            Err(ProviderError::Provider("not used".to_string()))
        }

        async fn sign_out(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn refresh_token(
            &self,
            _principal: &Principal,
            _force: bool,
        ) -> Result<String, ProviderError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let mut queue = self.refreshes.lock().unwrap();
            if queue.is_empty() {
                Err(ProviderError::NotSignedIn)
            } else {
                queue.remove(0)
            }
        }

        fn subscribe_state_changes(&self) -> broadcast::Receiver<AuthChange> {
            self.state_tx.subscribe()
        }

        fn subscribe_token_changes(&self) -> broadcast::Receiver<AuthChange> {
            self.token_tx.subscribe()
        }

        async fn resume(&self) {}
    }

    struct Harness {
        _dir: tempfile::TempDir,
        store: SessionStore,
        provider: Arc<StubProvider>,
        api: ApiClient,
        revoked_rx: mpsc::UnboundedReceiver<SessionRevoked>,
    }

    fn harness(base_url: &str, refreshes: Vec<Result<String, ProviderError>>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        let provider = Arc::new(StubProvider::new(refreshes));
        let (revoked_tx, revoked_rx) = mpsc::unbounded_channel();
        let api = ApiClient::new(
            base_url,
            store.clone(),
            provider.clone(),
            revoked_tx,
        )
        .unwrap();
        Harness {
            _dir: dir,
            store,
            provider,
            api,
            revoked_rx,
        }
    }

    fn stored_session(store: &SessionStore, token: &str) {
        store.save_session(&Session {
            uid: "u-1".to_string(),
            email: Some("a@b.com".to_string()),
            name: Some("Ada".to_string()),
            token: token.to_string(),
            role: None,
        });
    }

    fn profile_body() -> serde_json::Value {
        json!({ "uid": "u-1", "email": "a@b.com", "displayName": "Ada", "role": "admin" })
    }

    #[tokio::test]
    async fn test_attaches_raw_token_header() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/profile"))
            .and(header("authorization", "tok-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile_body()))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness(&server.uri(), vec![]);
        stored_session(&h.store, "tok-123");

        let profile = h.api.fetch_profile().await?;
        assert_eq!(profile.role.as_deref(), Some("admin"));
        assert_eq!(h.provider.refresh_call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_session_sends_no_auth_header() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/profile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile_body()))
            .mount(&server)
            .await;

        let h = harness(&server.uri(), vec![]);
        let _ = h.api.fetch_profile().await?;

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].headers.get("authorization").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_401_refreshes_and_resubmits_once() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/profile"))
            .and(header("authorization", "tok-old"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/profile"))
            .and(header("authorization", "tok-new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile_body()))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness(&server.uri(), vec![Ok("tok-new".to_string())]);
        stored_session(&h.store, "tok-old");

        let profile = h.api.fetch_profile().await?;
        assert_eq!(profile.uid, "u-1");
        assert_eq!(h.provider.refresh_call_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_persistent_401_retries_exactly_once() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/profile"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let h = harness(&server.uri(), vec![Ok("tok-new".to_string())]);
        stored_session(&h.store, "tok-old");

        let err = h
            .api
            .fetch_profile()
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(h.provider.refresh_call_count(), 1);
        server.verify().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_401_without_obtainable_token_propagates_without_resubmit() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/profile"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness(
            &server.uri(),
            vec![Err(ProviderError::NotSignedIn)],
        );
        stored_session(&h.store, "tok-old");

        let err = h
            .api
            .fetch_profile()
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        assert!(matches!(err, ApiError::Unauthorized));
        server.verify().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_403_purges_session_and_notifies_controller() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/profile"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({ "message": "Account disabled" })),
            )
            .mount(&server)
            .await;

        let mut h = harness(&server.uri(), vec![]);
        stored_session(&h.store, "tok-123");

        let err = h
            .api
            .fetch_profile()
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        assert!(matches!(err, ApiError::AccessDenied(_)));
        assert_eq!(err.user_message(), "Account disabled");

        // Stored session is gone and the controller was told.
        assert!(h.store.load_session().is_none());
        assert!(h.revoked_rx.try_recv().is_ok());
        assert_eq!(h.provider.refresh_call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_register_sends_camelcase_body_without_token() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register"))
            .and(body_json(json!({
                "email": "a@b.com",
                "password": "secret",
                "displayName": "Ada",
                "adminToken": "letmein"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "uid": "u-1" })))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness(&server.uri(), vec![]);
        h.api
            .register(&Registration {
                email: "a@b.com".to_string(),
                password: "secret".to_string(),
                display_name: "Ada".to_string(),
                admin_token: Some("letmein".to_string()),
                system_location: None,
            })
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_register_failure_surfaces_server_message() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_json(json!({ "message": "Email already in use" })),
            )
            .mount(&server)
            .await;

        let h = harness(&server.uri(), vec![]);
        let err = h
            .api
            .register(&Registration {
                email: "a@b.com".to_string(),
                password: "secret".to_string(),
                display_name: "Ada".to_string(),
                admin_token: None,
                system_location: None,
            })
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        assert_eq!(err.user_message(), "Email already in use");
        Ok(())
    }

    #[test]
    fn test_registration_wire_shape_omits_absent_optionals() {
        let registration = Registration {
            email: "a@b.com".to_string(),
            password: "secret".to_string(),
            display_name: "Ada".to_string(),
            admin_token: None,
            system_location: None,
        };
        let value = serde_json::to_value(&registration).unwrap();
        assert_eq!(
            value,
            json!({ "email": "a@b.com", "password": "secret", "displayName": "Ada" })
        );
    }
}

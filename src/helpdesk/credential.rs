//! OAuth access credential for the helpdesk API.
//!
//! One [`CredentialManager`] owns the credential for the whole process. All
//! refreshes go through its mutex, and a caller only refreshes when the
//! token it saw rejected is still the current one. Anyone racing behind it
//! picks up the token that was just minted.
use crate::config::HelpdeskConfig;
use crate::error::{HelpdeskError, StoreError};
use crate::store::write_atomic;
use crate::version::get_useragent;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCredential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl AccessCredential {
    pub fn from_config(config: &HelpdeskConfig) -> Option<Self> {
        let access_token = config.access_token.clone().filter(|t| !t.trim().is_empty())?;
        Some(Self {
            access_token,
            refresh_token: config.refresh_token.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    /// The credential ticket filing starts with. A persisted credential wins
    /// over the configured one; fields it lacks are filled from configuration.
    pub fn at_startup(config: &HelpdeskConfig) -> Option<Self> {
        Self::resolve(config, &FileCredentialStore::new(&config.credential_path))
    }

    fn resolve(config: &HelpdeskConfig, store: &dyn CredentialStore) -> Option<Self> {
        let configured = Self::from_config(config);
        let stored = match store.load() {
            Ok(stored) => stored.filter(|c| !c.access_token.trim().is_empty()),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable stored helpdesk credential");
                None
            }
        };
        let Some(stored) = stored else {
            return configured;
        };
        debug!(path = %config.credential_path, "using stored helpdesk credential");
        let configured = configured.as_ref();
        Some(Self {
            refresh_token: stored
                .refresh_token
                .or_else(|| configured.and_then(|c| c.refresh_token.clone())),
            client_id: stored
                .client_id
                .or_else(|| configured.and_then(|c| c.client_id.clone())),
            client_secret: stored
                .client_secret
                .or_else(|| configured.and_then(|c| c.client_secret.clone())),
            access_token: stored.access_token,
        })
    }

    fn refresh_grant(&self) -> Option<[(&'static str, &str); 4]> {
        fn present(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|s| !s.trim().is_empty())
        }
        Some([
            ("refresh_token", present(&self.refresh_token)?),
            ("client_id", present(&self.client_id)?),
            ("client_secret", present(&self.client_secret)?),
            ("grant_type", "refresh_token"),
        ])
    }
}

/// Durable home of the credential.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<AccessCredential>, StoreError>;
    fn save(&self, credential: &AccessCredential) -> Result<(), StoreError>;
}

pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<AccessCredential>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|source| StoreError::Corrupt {
                    path: self.path.display().to_string(),
                    source,
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, credential: &AccessCredential) -> Result<(), StoreError> {
        let content =
            serde_json::to_vec_pretty(credential).map_err(|source| StoreError::Corrupt {
                path: self.path.display().to_string(),
                source,
            })?;
        write_atomic(&self.path, &content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Valid,
    /// The refresh grant was rejected or is incomplete. No further refresh
    /// is attempted until the process restarts with new credentials.
    Invalid,
}

struct CredentialState {
    credential: AccessCredential,
    status: CredentialStatus,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

pub struct CredentialManager {
    client: reqwest::Client,
    token_url: String,
    store: Arc<dyn CredentialStore>,
    state: Mutex<CredentialState>,
}

impl CredentialManager {
    pub fn new(
        credential: AccessCredential,
        store: Arc<dyn CredentialStore>,
        accounts_url: &str,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(get_useragent())
            .build()
            .unwrap_or_default();
        Self {
            client,
            token_url: format!("{}/oauth/v2/token", accounts_url.trim_end_matches('/')),
            store,
            state: Mutex::new(CredentialState {
                credential,
                status: CredentialStatus::Valid,
            }),
        }
    }

    /// Returns `None` when neither the stored credential nor the
    /// configuration provides an access token.
    pub fn from_config(config: &HelpdeskConfig) -> Option<Self> {
        let store = Arc::new(FileCredentialStore::new(&config.credential_path));
        let credential = AccessCredential::resolve(config, store.as_ref())?;
        Some(Self::new(
            credential,
            store,
            &config.accounts_url,
            config.timeout(),
        ))
    }

    pub async fn current_token(&self) -> String {
        self.state.lock().await.credential.access_token.clone()
    }

    pub async fn status(&self) -> CredentialStatus {
        self.state.lock().await.status
    }

    /// Exchanges the refresh token for a new access token unless `stale` has
    /// already been replaced, in which case the current token is returned.
    /// Once the grant has been rejected, refreshing fails without a request.
    pub async fn refresh(&self, stale: &str) -> Result<String, HelpdeskError> {
        let mut state = self.state.lock().await;
        if state.credential.access_token != stale {
            return Ok(state.credential.access_token.clone());
        }
        if state.status == CredentialStatus::Invalid {
            return Err(HelpdeskError::Refresh(
                "refresh grant was rejected earlier; update the helpdesk credentials".into(),
            ));
        }

        let start = Instant::now();
        let token = match self.request_token(&state.credential).await {
            Ok(token) => token,
            Err(e) => {
                // network trouble leaves the grant usable for the next 401
                if matches!(e, HelpdeskError::Refresh(_)) {
                    state.status = CredentialStatus::Invalid;
                }
                error!(error = %e, "helpdesk token refresh failed");
                return Err(e);
            }
        };

        state.credential.access_token = token.clone();
        state.status = CredentialStatus::Valid;
        if let Err(e) = self.store.save(&state.credential) {
            error!(error = %e, "failed to persist refreshed helpdesk credential");
        }
        info!(
            elapsed = start.elapsed().as_millis(),
            "helpdesk access token refreshed"
        );
        Ok(token)
    }

    async fn request_token(&self, credential: &AccessCredential) -> Result<String, HelpdeskError> {
        let grant = credential
            .refresh_grant()
            .ok_or_else(|| HelpdeskError::Refresh("refresh credentials not configured".into()))?;
        let response = self.client.post(&self.token_url).form(&grant).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HelpdeskError::Refresh(format!("{}: {}", status, body)));
        }
        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|e| HelpdeskError::Decode(e.to_string()))?;
        match payload.access_token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(token),
            None => Err(HelpdeskError::Refresh(
                payload.error.unwrap_or_else(|| "no access_token in response".into()),
            )),
        }
    }

    /// Sends the request built by `build` with the current token. A 401 leads
    /// to exactly one refresh and one retry; a second 401 is
    /// [`HelpdeskError::Unauthorized`]. Other statuses are left to the caller.
    pub async fn send_authorized<F>(&self, build: F) -> Result<Response, HelpdeskError>
    where
        F: Fn(&str) -> RequestBuilder + Send + Sync,
    {
        let token = self.current_token().await;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("helpdesk rejected access token, refreshing");
        let token = self.refresh(&token).await?;
        let response = build(&token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(HelpdeskError::Unauthorized);
        }
        Ok(response)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_util::spawn_server;
    use axum::{extract::Form, http::HeaderMap, http::StatusCode, routing::get, routing::post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory store counting writes.
    #[derive(Default)]
    pub(crate) struct CountingStore {
        pub saved: std::sync::Mutex<Vec<AccessCredential>>,
    }

    impl CountingStore {
        pub fn saves(&self) -> usize {
            self.saved.lock().unwrap().len()
        }
    }

    impl CredentialStore for CountingStore {
        fn load(&self) -> Result<Option<AccessCredential>, StoreError> {
            Ok(self.saved.lock().unwrap().last().cloned())
        }

        fn save(&self, credential: &AccessCredential) -> Result<(), StoreError> {
            self.saved.lock().unwrap().push(credential.clone());
            Ok(())
        }
    }

    pub(crate) fn credential(token: &str) -> AccessCredential {
        AccessCredential {
            access_token: token.to_string(),
            refresh_token: Some("refresh-1".to_string()),
            client_id: Some("client".to_string()),
            client_secret: Some("secret".to_string()),
        }
    }

    /// Token endpoint that hands out `fresh-N` and counts calls.
    pub(crate) fn token_route(refreshes: Arc<AtomicUsize>) -> Router {
        Router::new().route(
            "/oauth/v2/token",
            post(move |Form(form): Form<HashMap<String, String>>| {
                let refreshes = refreshes.clone();
                async move {
                    if form.get("grant_type").map(String::as_str) != Some("refresh_token")
                        || form.get("refresh_token").map(String::as_str) != Some("refresh-1")
                    {
                        return Json(json!({"error": "invalid_code"}));
                    }
                    let n = refreshes.fetch_add(1, Ordering::SeqCst) + 1;
                    Json(json!({"access_token": format!("fresh-{}", n), "expires_in": 3600}))
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_are_single_flight() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let addr = spawn_server(token_route(refreshes.clone())).await;
        let store = Arc::new(CountingStore::default());
        let manager = CredentialManager::new(
            credential("stale"),
            store.clone(),
            &format!("http://{}", addr),
            Duration::from_secs(5),
        );

        let (a, b) = tokio::join!(manager.refresh("stale"), manager.refresh("stale"));
        assert_eq!(a.unwrap(), "fresh-1");
        assert_eq!(b.unwrap(), "fresh-1");
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(store.saves(), 1);
        assert_eq!(manager.current_token().await, "fresh-1");
    }

    #[tokio::test]
    async fn test_rejected_refresh_marks_invalid() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let addr = spawn_server(token_route(refreshes)).await;
        let store = Arc::new(CountingStore::default());
        let mut cred = credential("stale");
        cred.refresh_token = Some("revoked".to_string());
        let manager =
            CredentialManager::new(cred, store.clone(), &format!("http://{}", addr), Duration::from_secs(5));

        let err = manager.refresh("stale").await.unwrap_err();
        assert!(matches!(err, HelpdeskError::Refresh(ref msg) if msg == "invalid_code"));
        assert_eq!(manager.status().await, CredentialStatus::Invalid);
        assert_eq!(manager.current_token().await, "stale");
        assert_eq!(store.saves(), 0);
    }

    #[tokio::test]
    async fn test_invalid_grant_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/oauth/v2/token",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_code"})))
                }
            }),
        );
        let addr = spawn_server(app).await;
        let manager = CredentialManager::new(
            credential("stale"),
            Arc::new(CountingStore::default()),
            &format!("http://{}", addr),
            Duration::from_secs(5),
        );

        assert!(manager.refresh("stale").await.is_err());
        assert!(matches!(
            manager.refresh("stale").await,
            Err(HelpdeskError::Refresh(_))
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status().await, CredentialStatus::Invalid);
    }

    #[tokio::test]
    async fn test_unreachable_token_endpoint_keeps_grant_valid() {
        let manager = CredentialManager::new(
            credential("stale"),
            Arc::new(CountingStore::default()),
            "http://127.0.0.1:9",
            Duration::from_secs(1),
        );
        assert!(matches!(
            manager.refresh("stale").await,
            Err(HelpdeskError::Transport(_))
        ));
        assert_eq!(manager.status().await, CredentialStatus::Valid);
    }

    #[test]
    fn test_refresh_grant_requires_every_field() {
        let binding = credential("t");
        let grant = binding.refresh_grant().unwrap();
        assert_eq!(grant[0], ("refresh_token", "refresh-1"));
        assert_eq!(grant[3], ("grant_type", "refresh_token"));

        let mut blank = credential("t");
        blank.client_secret = Some("  ".to_string());
        assert!(blank.refresh_grant().is_none());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_fails_without_request() {
        let store = Arc::new(CountingStore::default());
        let mut cred = credential("stale");
        cred.refresh_token = None;
        let manager = CredentialManager::new(cred, store, "http://127.0.0.1:9", Duration::from_secs(1));
        assert!(matches!(
            manager.refresh("stale").await,
            Err(HelpdeskError::Refresh(_))
        ));
    }

    #[tokio::test]
    async fn test_send_authorized_retries_once() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = token_route(refreshes.clone()).route(
            "/ping",
            get(move |headers: HeaderMap| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                        Some("Zoho-oauthtoken fresh-1") => StatusCode::OK,
                        _ => StatusCode::UNAUTHORIZED,
                    }
                }
            }),
        );
        let addr = spawn_server(app).await;
        let base = format!("http://{}", addr);
        let manager = CredentialManager::new(
            credential("stale"),
            Arc::new(CountingStore::default()),
            &base,
            Duration::from_secs(5),
        );
        let client = reqwest::Client::new();

        let response = manager
            .send_authorized(|token| {
                client
                    .get(format!("{}/ping", base))
                    .header("Authorization", format!("Zoho-oauthtoken {}", token))
            })
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);

        // the refreshed token is reused without another refresh
        manager
            .send_authorized(|token| {
                client
                    .get(format!("{}/ping", base))
                    .header("Authorization", format!("Zoho-oauthtoken {}", token))
            })
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_file_store_roundtrip_and_startup_preference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        let store = FileCredentialStore::new(&path);
        assert!(store.load().unwrap().is_none());

        let mut stored = credential("from-disk");
        stored.client_secret = None;
        store.save(&stored).unwrap();

        let config = HelpdeskConfig {
            access_token: Some("from-config".to_string()),
            client_secret: Some("configured-secret".to_string()),
            credential_path: path.display().to_string(),
            ..Default::default()
        };
        let manager = CredentialManager::from_config(&config).unwrap();
        let state = manager.state.try_lock().unwrap();
        assert_eq!(state.credential.access_token, "from-disk");
        assert_eq!(
            state.credential.client_secret.as_deref(),
            Some("configured-secret")
        );

        // a stored credential alone is enough to start
        let stored_only = HelpdeskConfig {
            credential_path: path.display().to_string(),
            ..Default::default()
        };
        assert_eq!(
            AccessCredential::at_startup(&stored_only).unwrap().access_token,
            "from-disk"
        );
        let neither = HelpdeskConfig {
            credential_path: dir.path().join("absent.json").display().to_string(),
            ..Default::default()
        };
        assert!(AccessCredential::at_startup(&neither).is_none());
        assert!(CredentialManager::from_config(&neither).is_none());
    }
}

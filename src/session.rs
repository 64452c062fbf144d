//! Authorized-session handles consumed by the engine.
//!
//! The engine never acquires credentials itself. Callers hand it a
//! [`Session`] on every call; the engine only checks, refreshes and
//! invalidates it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};

/// Refresh this long before the recorded expiry.
const EXPIRY_SKEW_MS: i64 = 60_000;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

#[async_trait]
pub trait Session: Send + Sync {
    /// Whether the session can currently authorize requests (possibly after a refresh).
    fn is_valid(&self) -> bool;

    /// Renew the access token if it is expired or about to expire.
    async fn refresh_if_needed(&self) -> SyncResult<()>;

    /// Forget the credential; later calls fail with `NotAuthorized`.
    fn invalidate(&self);

    /// Bearer token for the next request.
    fn access_token(&self) -> Option<String>;
}

/// Ensure `session` is usable before any remote call is issued.
pub async fn authorize(session: &dyn Session) -> SyncResult<()> {
    if !session.is_valid() {
        return Err(SyncError::NotAuthorized(
            "No tokens found, please authenticate first.".to_string(),
        ));
    }
    session.refresh_if_needed().await
}

// ---- Static session ----

/// A fixed bearer token with no refresh capability.
pub struct StaticSession {
    token: RwLock<Option<String>>,
}

impl StaticSession {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

#[async_trait]
impl Session for StaticSession {
    fn is_valid(&self) -> bool {
        self.token.read().expect("session read lock").is_some()
    }

    async fn refresh_if_needed(&self) -> SyncResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(SyncError::NotAuthorized("session invalidated".to_string()))
        }
    }

    fn invalidate(&self) {
        *self.token.write().expect("session write lock") = None;
    }

    fn access_token(&self) -> Option<String> {
        self.token.read().expect("session read lock").clone()
    }
}

// ---- OAuth token-file session ----

/// OAuth client registration, as downloaded from the provider console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ClientCredentials {
    /// Accepts the `installed` and `web` layouts as well as a bare object.
    pub fn parse(content: &str) -> SyncResult<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| SyncError::Config(format!("invalid credentials file: {}", e)))?;
        let conf = value
            .get("installed")
            .or_else(|| value.get("web"))
            .cloned()
            .unwrap_or(value);
        serde_json::from_value(conf)
            .map_err(|e| SyncError::Config(format!("invalid credentials file: {}", e)))
    }

    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "missing credentials at '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }
}

/// Token document persisted between runs. Unknown fields are preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiry as epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl StoredToken {
    fn needs_refresh(&self, now_ms: i64) -> bool {
        match self.expiry_date {
            Some(expiry) => expiry - EXPIRY_SKEW_MS <= now_ms,
            None => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct OAuthSession {
    client: reqwest::Client,
    credentials: ClientCredentials,
    token_path: PathBuf,
    token: RwLock<Option<StoredToken>>,
}

impl OAuthSession {
    pub fn new(
        credentials: ClientCredentials,
        token_path: impl Into<PathBuf>,
        token: Option<StoredToken>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
            token_path: token_path.into(),
            token: RwLock::new(token),
        }
    }

    /// Restore a session from the credentials and token files. A missing
    /// token file yields an invalid session rather than an error.
    pub fn from_files(credentials_path: &Path, token_path: &Path) -> SyncResult<Self> {
        let credentials = ClientCredentials::load(credentials_path)?;
        let token = if token_path.exists() {
            let content = std::fs::read_to_string(token_path)?;
            match serde_json::from_str::<StoredToken>(&content) {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!(path = %token_path.display(), error = %e, "ignoring unreadable token file");
                    None
                }
            }
        } else {
            None
        };
        Ok(Self::new(credentials, token_path, token))
    }

    fn persist(&self, token: &StoredToken) -> SyncResult<()> {
        let content = serde_json::to_string_pretty(token)?;
        std::fs::write(&self.token_path, content)?;
        Ok(())
    }

    async fn refresh(&self, refresh_token: String) -> SyncResult<()> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        let res = self
            .client
            .post(&self.credentials.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| SyncError::TransientNetwork(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<OAuthErrorResponse>(&body)
                .map(|e| match e.error_description {
                    Some(d) => format!("{}: {}", e.error, d),
                    None => e.error,
                })
                .unwrap_or_else(|_| format!("HTTP {}", status));
            if status.is_client_error() {
                warn!(reason = %reason, "token refresh rejected, dropping stored token");
                self.invalidate();
                return Err(SyncError::NotAuthorized(reason));
            }
            return Err(SyncError::TransientNetwork(format!(
                "token refresh failed: {}",
                reason
            )));
        }

        let refreshed: RefreshResponse = res
            .json()
            .await
            .map_err(|e| SyncError::TransientNetwork(e.to_string()))?;

        let updated = {
            let mut guard = self.token.write().expect("session write lock");
            let token = guard
                .as_mut()
                .ok_or_else(|| SyncError::NotAuthorized("session invalidated".to_string()))?;
            token.access_token = refreshed.access_token;
            token.expiry_date = refreshed
                .expires_in
                .map(|secs| now_millis() + secs * 1000);
            if let Some(rt) = refreshed.refresh_token {
                token.refresh_token = Some(rt);
            }
            token.clone()
        };
        self.persist(&updated)?;
        info!("access token refreshed");
        Ok(())
    }
}

#[async_trait]
impl Session for OAuthSession {
    fn is_valid(&self) -> bool {
        let guard = self.token.read().expect("session read lock");
        match guard.as_ref() {
            Some(token) => token.refresh_token.is_some() || !token.needs_refresh(now_millis()),
            None => false,
        }
    }

    async fn refresh_if_needed(&self) -> SyncResult<()> {
        let refresh_token = {
            let guard = self.token.read().expect("session read lock");
            let token = guard.as_ref().ok_or_else(|| {
                SyncError::NotAuthorized("No tokens found, please authenticate first.".to_string())
            })?;
            if !token.needs_refresh(now_millis()) {
                return Ok(());
            }
            token.refresh_token.clone().ok_or_else(|| {
                SyncError::NotAuthorized("access token expired and no refresh token".to_string())
            })?
        };
        self.refresh(refresh_token).await
    }

    fn invalidate(&self) {
        *self.token.write().expect("session write lock") = None;
        if self.token_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.token_path) {
                warn!(error = %e, "failed to remove token file");
            }
        }
    }

    fn access_token(&self) -> Option<String> {
        self.token
            .read()
            .expect("session read lock")
            .as_ref()
            .map(|t| t.access_token.clone())
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

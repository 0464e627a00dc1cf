//! Session credentials and where they are persisted

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HttpError, HttpResult};

/// Margin before expiry at which credentials are treated as expired
const EXPIRY_SKEW_SECS: i64 = 60;

/// Access/refresh token pair for the signed-in user
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl SessionCredentials {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        user_id: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            user_id,
            expires_at,
        }
    }

    /// Credentials that expire `expires_in` seconds after `now`
    pub fn expiring_in(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        user_id: Option<String>,
        now: DateTime<Utc>,
        expires_in: i64,
    ) -> Self {
        Self::new(
            access_token,
            refresh_token,
            user_id,
            now + Duration::seconds(expires_in.max(0)),
        )
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Expired, or expiring within the skew margin, at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_SKEW_SECS) >= self.expires_at
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.trim().is_empty()
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Persistence for the current session
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Stored credentials, or `None` when signed out
    async fn load(&self) -> HttpResult<Option<SessionCredentials>>;

    /// Replace the stored credentials
    async fn save(&self, credentials: &SessionCredentials) -> HttpResult<()>;
}

/// Process-local credential store
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    credentials: RwLock<Option<SessionCredentials>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: SessionCredentials) -> Self {
        Self {
            credentials: RwLock::new(Some(credentials)),
        }
    }

    /// Snapshot of the stored credentials
    pub fn current(&self) -> Option<SessionCredentials> {
        self.credentials.read().clone()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&self) -> HttpResult<Option<SessionCredentials>> {
        Ok(self.current())
    }

    async fn save(&self, credentials: &SessionCredentials) -> HttpResult<()> {
        *self.credentials.write() = Some(credentials.clone());
        Ok(())
    }
}

/// Credential store backed by a JSON file
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a crash mid-write leaves the previous credentials intact.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "credentials".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> HttpResult<Option<SessionCredentials>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HttpError::Store(format!("{}: {}", self.path.display(), e))),
        }
    }

    async fn save(&self, credentials: &SessionCredentials) -> HttpResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = self.temp_path();
        let bytes = serde_json::to_vec_pretty(credentials)?;
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        debug!(path = %self.path.display(), "Saved session credentials");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn credentials(access: &str) -> SessionCredentials {
        SessionCredentials::new(
            access,
            "refresh-token",
            Some("user-1".to_string()),
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_expiry_uses_skew_margin() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let creds = SessionCredentials::expiring_in("a", "r", None, now, 3600);

        assert!(!creds.is_expired_at(now));
        assert!(!creds.is_expired_at(now + Duration::seconds(3500)));
        assert!(creds.is_expired_at(now + Duration::seconds(3541)));
        assert!(creds.is_expired_at(now + Duration::seconds(7200)));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let debug_str = format!("{:?}", credentials("secret-access"));
        assert!(!debug_str.contains("secret-access"));
        assert!(!debug_str.contains("refresh-token"));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains("user-1"));
    }

    #[test]
    fn test_has_refresh_token() {
        let mut creds = credentials("a");
        assert!(creds.has_refresh_token());
        creds.refresh_token = "  ".to_string();
        assert!(!creds.has_refresh_token());
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryCredentialStore::new();
        assert!(store.load().await.unwrap().is_none());

        store.save(&credentials("first")).await.unwrap();
        store.save(&credentials("second")).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().access_token, "second");
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let store = FileCredentialStore::new(&path);

        assert!(store.load().await.unwrap().is_none());

        store.save(&credentials("persisted")).await.unwrap();
        let reopened = FileCredentialStore::new(&path);
        assert_eq!(reopened.load().await.unwrap(), Some(credentials("persisted")));
        assert!(!dir.path().join("nested").join("session.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{not json").unwrap();

        let result = FileCredentialStore::new(&path).load().await;
        assert!(matches!(result, Err(HttpError::Json(_))));
    }

    #[test]
    fn test_missing_user_id_deserializes() {
        let json = r#"{"access_token":"a","refresh_token":"r","expires_at":"2030-01-01T00:00:00Z"}"#;
        let creds: SessionCredentials = serde_json::from_str(json).unwrap();
        assert_eq!(creds.user_id, None);
    }
}

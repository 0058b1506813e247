use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::{load_json, save_json, KeyValueStore, StoreError, BACKEND_SESSION_KEY};

/// Renew this long before the token actually expires.
const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

/// A signed-in backend session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl SessionData {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at - Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES)
    }

    pub fn minutes_until_expiry(&self) -> i64 {
        (self.expires_at - Utc::now()).num_minutes().max(0)
    }
}

/// The backend session, persisted in the key-value store next to the local
/// identity data.
pub struct Session {
    store: Arc<dyn KeyValueStore>,
    pub data: Option<SessionData>,
}

impl Session {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store, data: None }
    }

    /// Restore the saved session. An expired one is dropped from the store
    /// and reported as `false`.
    pub async fn load(&mut self) -> Result<bool, StoreError> {
        let saved = load_json::<SessionData>(self.store.as_ref(), BACKEND_SESSION_KEY).await?;
        match saved {
            Some(data) if !data.is_expired() => {
                self.data = Some(data);
                Ok(true)
            }
            Some(_) => {
                debug!("Discarding expired backend session");
                self.store.remove(BACKEND_SESSION_KEY).await?;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    pub async fn save(&self) -> Result<(), StoreError> {
        match &self.data {
            Some(data) => save_json(self.store.as_ref(), BACKEND_SESSION_KEY, data).await,
            None => self.store.remove(BACKEND_SESSION_KEY).await,
        }
    }

    pub async fn clear(&mut self) -> Result<(), StoreError> {
        self.data = None;
        self.store.remove(BACKEND_SESSION_KEY).await
    }

    pub fn update(&mut self, data: SessionData) {
        self.data = Some(data);
    }

    pub fn is_valid(&self) -> bool {
        self.data.as_ref().is_some_and(|d| !d.is_expired())
    }

    /// No usable session, or one close enough to expiry that it should be
    /// renewed now.
    pub fn needs_renewal(&self) -> bool {
        self.data
            .as_ref()
            .map_or(true, |d| d.needs_refresh_at(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, MemoryStore};

    fn data(expires_in: Duration) -> SessionData {
        SessionData {
            access_token: "tok".to_string(),
            refresh_token: None,
            user_id: "auth-1".to_string(),
            email: Some("a@b.co".to_string()),
            expires_at: Utc::now() + expires_in,
        }
    }

    #[tokio::test]
    async fn test_session_survives_reopen_of_file_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FileStore::new(dir.path().to_path_buf()).expect("store"));
        let mut session = Session::new(store.clone());
        session.update(data(Duration::hours(1)));
        session.save().await.expect("save");

        let reopened = Arc::new(FileStore::new(dir.path().to_path_buf()).expect("store"));
        let mut reloaded = Session::new(reopened.clone());
        assert!(reloaded.load().await.expect("load"));
        assert_eq!(reloaded.data, session.data);
        assert!(reloaded.is_valid());

        reloaded.clear().await.expect("clear");
        assert!(!Session::new(reopened).load().await.expect("load"));
    }

    #[tokio::test]
    async fn test_expired_session_is_dropped_on_load() {
        let store = Arc::new(MemoryStore::new());
        let mut session = Session::new(store.clone());
        session.update(data(Duration::minutes(-1)));
        session.save().await.expect("save");
        assert!(!session.is_valid());

        let mut reloaded = Session::new(store.clone());
        assert!(!reloaded.load().await.expect("load"));
        assert!(reloaded.data.is_none());
        assert!(store.get(BACKEND_SESSION_KEY).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_needs_renewal_near_expiry() {
        let mut session = Session::new(Arc::new(MemoryStore::new()));
        assert!(session.needs_renewal());

        session.update(data(Duration::minutes(2)));
        assert!(session.is_valid());
        assert!(session.needs_renewal());

        session.update(data(Duration::hours(1)));
        assert!(!session.needs_renewal());
    }

    #[test]
    fn test_expiry_boundaries() {
        let session = data(Duration::zero());
        let at = session.expires_at;
        assert!(session.is_expired_at(at));
        assert!(!session.is_expired_at(at - Duration::seconds(1)));
        assert!(session.needs_refresh_at(at - Duration::minutes(4)));
        assert!(!session.needs_refresh_at(at - Duration::minutes(6)));
    }
}

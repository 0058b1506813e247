//! Durable local key-value storage.
//!
//! Local identity and visit data live under three logical keys: the user
//! roster, the current-identity pointer and the local visit ledger. The
//! backend session has a fourth. Values are JSON strings so any string store
//! (files, platform key-value APIs) can back it.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

/// All known local identities.
pub const USERS_KEY: &str = "@tourist_app_users";

/// The identity that is currently signed in.
pub const CURRENT_USER_KEY: &str = "@tourist_app_current_user";

/// Visits recorded without a reachable backend.
pub const VISITS_KEY: &str = "@user_visits";

/// Token of the signed-in backend session, if any.
pub const BACKEND_SESSION_KEY: &str = "@backend_session";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O failed for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stored value for {key} is not valid JSON: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize value for {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Read and decode a JSON value.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode and write a JSON value.
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Serialize {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &raw).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_json_missing_key() {
        let store = MemoryStore::new();
        let value: Option<Vec<String>> = load_json(&store, VISITS_KEY).await.expect("load");
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_load_json_reports_corruption() {
        let store = MemoryStore::new();
        store.set(USERS_KEY, "{not json").await.expect("set");
        let err = load_json::<Vec<String>>(&store, USERS_KEY)
            .await
            .expect_err("corrupt value should fail");
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}

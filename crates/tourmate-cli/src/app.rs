//! Process-wide state for one CLI invocation.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use tourmate_core::remote::{
    ChangeFeed, CredentialStore, MemoryRemote, PollingFeed, PostgrestClient, RemoteClient, Session,
};
use tourmate_core::store::FileStore;
use tourmate_core::{SystemClock, Tourmate};

use crate::config::Config;

/// Subdirectory of the data dir holding the key-value store.
const STORE_DIR: &str = "store";

/// A configured remote backend and its remembered credentials.
pub struct Backend {
    pub client: Arc<PostgrestClient>,
    pub credentials: CredentialStore,
}

pub struct App {
    pub core: Tourmate,
    pub config: Config,
    /// `None` when running offline against the in-process backend.
    pub backend: Option<Backend>,
    pub session: Session,
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let store = Arc::new(FileStore::new(data_dir.join(STORE_DIR))?);

        let mut session = Session::new(store.clone());
        if let Err(e) = session.load().await {
            warn!(error = %e, "Failed to load backend session");
        }

        let settings = config.core_settings();
        let (remote, feed, backend): (Arc<dyn RemoteClient>, Arc<dyn ChangeFeed>, _) =
            match config.backend() {
                Some((url, anon_key)) => {
                    let client = Arc::new(PostgrestClient::new(url, anon_key)?);
                    if session.is_valid() {
                        client.set_session(session.data.clone());
                    }
                    let remote: Arc<dyn RemoteClient> = client.clone();
                    let feed: Arc<dyn ChangeFeed> =
                        Arc::new(PollingFeed::new(remote.clone(), settings.poll_interval));
                    let backend = Backend {
                        client,
                        credentials: CredentialStore::new(url),
                    };
                    (remote, feed, Some(backend))
                }
                None => {
                    info!("No backend configured, running offline");
                    let memory = Arc::new(MemoryRemote::new());
                    let remote: Arc<dyn RemoteClient> = memory.clone();
                    let feed: Arc<dyn ChangeFeed> = memory;
                    (remote, feed, None)
                }
            };

        let core = Tourmate::new(remote, feed, store, Arc::new(SystemClock), settings);
        core.initialize()
            .await
            .context("Failed to restore local identity")?;

        let mut app = Self {
            core,
            config,
            backend,
            session,
        };
        app.restore_backend_session().await;
        Ok(app)
    }

    /// Sign in again with remembered credentials when the saved backend
    /// session has expired or is about to. A session close to expiry stays
    /// in use if renewal fails.
    async fn restore_backend_session(&mut self) {
        let Some(backend) = &self.backend else {
            return;
        };
        if !self.session.needs_renewal() {
            return;
        }
        let Some(email) = self.config.last_email.as_deref() else {
            return;
        };

        let password = match backend.credentials.password(email) {
            Ok(Some(p)) => p,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Failed to read remembered credentials");
                return;
            }
        };
        match backend.client.sign_in_with_password(email, &password).await {
            Ok(data) => {
                self.session.update(data);
                if let Err(e) = self.session.save().await {
                    warn!(error = %e, "Failed to save session");
                }
                info!("Backend session renewed");
            }
            Err(e) => warn!(error = %e, "Backend sign-in failed, continuing offline"),
        }
    }
}

//! Composition root.

use std::sync::Arc;

use tracing::info;

use crate::cache::CacheService;
use crate::clock::Clock;
use crate::ledger::VisitLedger;
use crate::models::{EntityType, UserIdentity};
use crate::remote::{ChangeFeed, RemoteClient};
use crate::session::{AuthError, IdentityManager, UserScopedCache};
use crate::settings::CoreSettings;
use crate::store::KeyValueStore;
use crate::sync::Reconciler;

/// Every core service, built once and shared.
pub struct Tourmate {
    settings: CoreSettings,
    caches: CacheService,
    ledger: VisitLedger,
    identity: IdentityManager,
    reconciler: Arc<Reconciler>,
    /// Favorite entity ids of the signed-in user.
    favorites: Arc<UserScopedCache<EntityType>>,
    /// Review drafts of the signed-in user, keyed by entity id.
    reviews: Arc<UserScopedCache<String>>,
}

impl Tourmate {
    /// Wire the services together. Must be called from within a tokio
    /// runtime since it starts the reconciler worker.
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        feed: Arc<dyn ChangeFeed>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        settings: CoreSettings,
    ) -> Self {
        let caches = CacheService::new(remote.clone(), feed, clock.clone(), settings.cache_ttl);
        let ledger = VisitLedger::new(remote.clone(), store.clone(), clock.clone());
        let reconciler = Arc::new(Reconciler::spawn(
            remote,
            settings.sync_max_attempts,
            settings.sync_initial_backoff,
        ));
        let identity = IdentityManager::new(store, clock).with_reconciler(reconciler.clone());

        let favorites = Arc::new(UserScopedCache::new("favorites"));
        let reviews = Arc::new(UserScopedCache::new("reviews"));
        identity.register_scoped(favorites.clone());
        identity.register_scoped(reviews.clone());

        Self {
            settings,
            caches,
            ledger,
            identity,
            reconciler,
            favorites,
            reviews,
        }
    }

    /// Restore the signed-in identity. Call once after construction.
    pub async fn initialize(&self) -> Result<Option<UserIdentity>, AuthError> {
        let user = self.identity.initialize().await?;
        info!(
            signed_in = user.is_some(),
            cache_ttl_secs = self.settings.cache_ttl.num_seconds(),
            "Core initialized"
        );
        Ok(user)
    }

    pub fn settings(&self) -> &CoreSettings {
        &self.settings
    }

    pub fn caches(&self) -> &CacheService {
        &self.caches
    }

    pub fn ledger(&self) -> &VisitLedger {
        &self.ledger
    }

    pub fn identity(&self) -> &IdentityManager {
        &self.identity
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn favorites(&self) -> &UserScopedCache<EntityType> {
        &self.favorites
    }

    pub fn reviews(&self) -> &UserScopedCache<String> {
        &self.reviews
    }

    /// Stop live subscriptions and wait for queued backend writes.
    pub async fn shutdown(&self) {
        self.caches.hub().shutdown().await;
        if let Err(e) = self.reconciler.flush().await {
            tracing::warn!(error = %e, "Pending sync jobs not flushed");
        }
    }
}

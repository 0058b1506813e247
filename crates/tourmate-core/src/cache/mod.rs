//! Time-bounded caches over the remote content collections.
//!
//! One [`ResourceCache`] per collection, composed with the
//! [`SubscriptionHub`](crate::subscription::SubscriptionHub) in a
//! [`CacheService`] so remote change events invalidate the right cache.

pub mod entry;
pub mod ranking;
pub mod resource;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;

pub use entry::CacheEntry;
pub use resource::{DataSource, FetchOutcome, ResourceCache};

use crate::clock::Clock;
use crate::models::{Collection, Delicacy, Destination};
use crate::remote::{ChangeFeed, RemoteClient};
use crate::subscription::SubscriptionHub;

/// Anything that must forget its state when its collection changes remotely.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self);
}

/// Both content caches plus the hub that keeps them coherent.
pub struct CacheService {
    destinations: Arc<ResourceCache<Destination>>,
    delicacies: Arc<ResourceCache<Delicacy>>,
    hub: SubscriptionHub,
}

impl CacheService {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        feed: Arc<dyn ChangeFeed>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        let destinations = Arc::new(ResourceCache::new(remote.clone(), clock.clone(), ttl));
        let delicacies = Arc::new(ResourceCache::new(remote, clock, ttl));

        let mut invalidators: HashMap<Collection, Arc<dyn CacheInvalidator>> = HashMap::new();
        invalidators.insert(Collection::Destinations, destinations.clone());
        invalidators.insert(Collection::Delicacies, delicacies.clone());

        Self {
            destinations,
            delicacies,
            hub: SubscriptionHub::new(feed, invalidators),
        }
    }

    pub fn destinations(&self) -> &ResourceCache<Destination> {
        &self.destinations
    }

    pub fn delicacies(&self) -> &ResourceCache<Delicacy> {
        &self.delicacies
    }

    pub fn hub(&self) -> &SubscriptionHub {
        &self.hub
    }

    pub fn clear_all(&self) {
        self.destinations.clear();
        self.delicacies.clear();
    }
}

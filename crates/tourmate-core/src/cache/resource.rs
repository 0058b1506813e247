use std::sync::{Arc, PoisonError, RwLock};

use chrono::Duration;
use tracing::{debug, info, warn};

use super::entry::CacheEntry;
use super::{ranking, CacheInvalidator};
use crate::clock::Clock;
use crate::models::{CatalogItem, Collection, Delicacy};
use crate::remote::{Query, RemoteClient, RemoteError, Row};
use crate::utils::contains_ignore_case;

/// Where a read was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Fresh cache entry, no I/O.
    Cache,
    /// Remote fetch that just replaced the entry.
    Remote,
    /// Remote fetch failed; items are whatever was cached before.
    Fallback,
}

/// Result of a cache read. Never an error: a failed fetch still carries the
/// last known items.
#[derive(Debug, Clone)]
pub struct FetchOutcome<T> {
    pub items: Vec<T>,
    pub source: DataSource,
    pub error: Option<RemoteError>,
}

impl<T> FetchOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Time-bounded cache over one remote collection.
pub struct ResourceCache<T: CatalogItem> {
    remote: Arc<dyn RemoteClient>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entry: RwLock<Option<Arc<CacheEntry<T>>>>,
}

impl<T: CatalogItem> ResourceCache<T> {
    pub fn new(remote: Arc<dyn RemoteClient>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            remote,
            clock,
            ttl,
            entry: RwLock::new(None),
        }
    }

    pub fn collection(&self) -> Collection {
        T::COLLECTION
    }

    fn current(&self) -> Option<Arc<CacheEntry<T>>> {
        self.entry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, entry: Option<Arc<CacheEntry<T>>>) {
        *self.entry.write().unwrap_or_else(PoisonError::into_inner) = entry;
    }

    /// Resolve the collection.
    ///
    /// With `use_cache` and a fresh entry this performs no I/O. Otherwise it
    /// fetches; the entry lock is never held across the fetch, so two
    /// overlapping fetches both store and the later completion wins.
    pub async fn get(&self, use_cache: bool) -> FetchOutcome<T> {
        if use_cache {
            if let Some(entry) = self.current() {
                if entry.is_fresh(self.clock.now()) {
                    debug!(collection = %T::COLLECTION, items = entry.items.len(), "Cache hit");
                    return FetchOutcome {
                        items: entry.items.clone(),
                        source: DataSource::Cache,
                        error: None,
                    };
                }
            }
        }

        match self.fetch_all().await {
            Ok(items) => {
                info!(collection = %T::COLLECTION, items = items.len(), "Fetched collection");
                let entry = CacheEntry::new(items.clone(), self.clock.now(), self.ttl);
                self.replace(Some(Arc::new(entry)));
                FetchOutcome {
                    items,
                    source: DataSource::Remote,
                    error: None,
                }
            }
            Err(e) => {
                warn!(collection = %T::COLLECTION, error = %e, "Fetch failed, serving cached items");
                FetchOutcome {
                    items: self.cached_items(),
                    source: DataSource::Fallback,
                    error: Some(e),
                }
            }
        }
    }

    async fn fetch_all(&self) -> Result<Vec<T>, RemoteError> {
        let mut query = Query::new(T::COLLECTION).eq("is_active", true);
        for (column, ascending) in T::ORDERING {
            query = query.order_by(column, *ascending);
        }
        let rows = self.remote.query(&query).await?;
        Ok(parse_rows(rows))
    }

    /// Drop the entry so the next read fetches.
    pub fn clear(&self) {
        self.replace(None);
        debug!(collection = %T::COLLECTION, "Cache cleared");
    }

    /// Current snapshot without I/O, fresh or not.
    pub fn cached_items(&self) -> Vec<T> {
        self.current()
            .map(|entry| entry.items.clone())
            .unwrap_or_default()
    }

    pub fn entry_age(&self) -> Option<String> {
        self.current()
            .map(|entry| entry.age_display(self.clock.now()))
    }

    pub fn is_fresh(&self) -> bool {
        self.current()
            .map(|entry| entry.is_fresh(self.clock.now()))
            .unwrap_or(false)
    }

    /// Look up one active item remotely, falling back to the cached copy.
    pub async fn by_id(&self, id: &str) -> Option<T> {
        let query = Query::new(T::COLLECTION)
            .eq("id", id)
            .eq("is_active", true)
            .limit(1);
        match self.remote.query(&query).await {
            Ok(rows) => parse_rows::<T>(rows).into_iter().next(),
            Err(e) => {
                warn!(collection = %T::COLLECTION, id, error = %e, "Lookup failed, checking cache");
                self.cached_items().into_iter().find(|item| item.id() == id)
            }
        }
    }

    pub async fn featured(&self, limit: usize) -> Vec<T> {
        ranking::featured(&self.get(true).await.items, limit)
    }

    pub async fn popular(&self, limit: usize) -> Vec<T> {
        ranking::popular(&self.get(true).await.items, limit)
    }

    /// Case-insensitive name search over the resolved collection.
    pub async fn search(&self, query: &str) -> Vec<T> {
        self.get(true)
            .await
            .items
            .into_iter()
            .filter(|item| contains_ignore_case(item.name(), query))
            .collect()
    }
}

impl ResourceCache<Delicacy> {
    /// Delicacies whose place of origin contains `location`.
    pub async fn by_location(&self, location: &str) -> Vec<Delicacy> {
        self.get(true)
            .await
            .items
            .into_iter()
            .filter(|d| contains_ignore_case(&d.location, location))
            .collect()
    }
}

impl<T: CatalogItem> CacheInvalidator for ResourceCache<T> {
    fn invalidate(&self) {
        self.clear();
    }
}

/// Rows that fail to parse are skipped rather than failing the whole fetch.
fn parse_rows<T: CatalogItem>(rows: Vec<Row>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(row) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(collection = %T::COLLECTION, error = %e, "Skipping malformed row");
                None
            }
        })
        .collect()
}

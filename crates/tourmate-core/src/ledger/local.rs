use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::error;

use crate::models::{EntityType, VisitRecord};
use crate::store::{load_json, save_json, KeyValueStore, StoreError, VISITS_KEY};

/// The on-device visit ledger stored under [`VISITS_KEY`].
///
/// Every read-modify-write runs under one lock so concurrent marks never
/// drop each other's records.
pub struct LocalVisits {
    store: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
}

impl LocalVisits {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<VisitRecord>, StoreError> {
        Ok(load_json(self.store.as_ref(), VISITS_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, visits: &[VisitRecord]) -> Result<(), StoreError> {
        save_json(self.store.as_ref(), VISITS_KEY, visits)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to write local visits"))
    }

    /// All records, in insertion order.
    pub async fn all(&self) -> Result<Vec<VisitRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    /// Records matching the filter, newest visit first.
    pub async fn list(&self, filter: Option<EntityType>) -> Result<Vec<VisitRecord>, StoreError> {
        let mut visits: Vec<VisitRecord> = self
            .all()
            .await?
            .into_iter()
            .filter(|v| filter.map_or(true, |t| v.entity_type == t))
            .collect();
        sort_newest_first(&mut visits);
        Ok(visits)
    }

    pub async fn for_entity(
        &self,
        entity_id: &str,
        entity_type: EntityType,
    ) -> Result<Vec<VisitRecord>, StoreError> {
        Ok(self
            .list(Some(entity_type))
            .await?
            .into_iter()
            .filter(|v| v.entity_id == entity_id)
            .collect())
    }

    pub async fn contains(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.all().await?.iter().any(|v| v.id == id))
    }

    pub async fn append(&self, record: VisitRecord) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut visits = self.load().await?;
        visits.push(record);
        self.save(&visits).await
    }

    /// Remove one record. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.remove_many(&[id.to_string()]).await? > 0)
    }

    pub async fn remove_many(&self, ids: &[String]) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().await;
        let mut visits = self.load().await?;
        let before = visits.len();
        visits.retain(|v| !ids.contains(&v.id));
        let removed = before - visits.len();
        if removed > 0 {
            self.save(&visits).await?;
        }
        Ok(removed)
    }

    /// Apply `edit` to one record and return the result, or `None` if the id
    /// is unknown.
    pub async fn modify<F>(&self, id: &str, edit: F) -> Result<Option<VisitRecord>, StoreError>
    where
        F: FnOnce(&mut VisitRecord),
    {
        let _guard = self.lock.lock().await;
        let mut visits = self.load().await?;
        let Some(record) = visits.iter_mut().find(|v| v.id == id) else {
            return Ok(None);
        };
        edit(record);
        let updated = record.clone();
        self.save(&visits).await?;
        Ok(Some(updated))
    }
}

pub(crate) fn sort_newest_first(visits: &mut [VisitRecord]) {
    visits.sort_by(|a, b| b.visited_at.cmp(&a.visited_at));
}

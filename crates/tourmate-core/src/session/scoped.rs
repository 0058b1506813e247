use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// State that belongs to whoever is signed in and must be dropped when the
/// identity changes.
pub trait UserScoped: Send + Sync {
    fn name(&self) -> &str;
    fn reset(&self);
}

/// In-memory per-user map (favorites, reviews).
pub struct UserScopedCache<T> {
    name: String,
    items: RwLock<HashMap<String, T>>,
}

impl<T: Clone + Send + Sync> UserScopedCache<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: T) -> Option<T> {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<T> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

impl<T: Clone + Send + Sync> UserScoped for UserScopedCache<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&self) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_everything() {
        let favorites: UserScopedCache<bool> = UserScopedCache::new("favorites");
        favorites.insert("d1", true);
        favorites.insert("d2", true);
        assert_eq!(favorites.len(), 2);

        favorites.reset();
        assert!(favorites.is_empty());
        assert_eq!(favorites.get("d1"), None);
        assert_eq!(favorites.name(), "favorites");
    }

    #[test]
    fn test_insert_replaces() {
        let reviews = UserScopedCache::new("reviews");
        assert_eq!(reviews.insert("d1", 3), None);
        assert_eq!(reviews.insert("d1", 5), Some(3));
        assert_eq!(reviews.values(), vec![5]);
        assert_eq!(reviews.remove("d1"), Some(5));
    }
}

//! In-memory `ResourceStore<T>` for reconciler unit tests.
//!
//! Grounded on `services::event_store::InMemoryEventStore`: a
//! `tokio::sync::RwLock` over a map, no cluster I/O, so every reconciler
//! in `services/` can be driven by a test without a running cluster.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use tokio::sync::RwLock;

use crate::domain::error::StoreError;
use crate::domain::ports::ResourceStore;

#[derive(Debug, Default)]
pub struct InMemoryStore<T> {
    objects: RwLock<HashMap<String, T>>,
}

impl<T> InMemoryStore<T>
where
    T: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    pub fn seeded(seed: impl IntoIterator<Item = (String, T)>) -> Self {
        Self {
            objects: RwLock::new(seed.into_iter().collect()),
        }
    }
}

#[async_trait]
impl<T> ResourceStore<T> for InMemoryStore<T>
where
    T: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    async fn get(&self, name: &str) -> Result<Option<T>, StoreError> {
        Ok(self.objects.read().await.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.objects.read().await.values().cloned().collect())
    }

    async fn create(&self, name: &str, object: T) -> Result<(), StoreError> {
        let mut objects = self.objects.write().await;
        if objects.contains_key(name) {
            return Err(StoreError::Conflict(name.to_string()));
        }
        objects.insert(name.to_string(), object);
        Ok(())
    }

    async fn update(&self, name: &str, object: T) -> Result<(), StoreError> {
        let mut objects = self.objects.write().await;
        if !objects.contains_key(name) {
            return Err(StoreError::NotFound(name.to_string()));
        }
        objects.insert(name.to_string(), object);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.objects.write().await.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store: InMemoryStore<String> = InMemoryStore::new();
        store.create("a", "hello".to_string()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("hello".to_string()));
    }

    #[tokio::test]
    async fn duplicate_create_is_conflict() {
        let store: InMemoryStore<String> = InMemoryStore::new();
        store.create("a", "hello".to_string()).await.unwrap();
        assert!(matches!(
            store.create("a", "again".to_string()).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store: InMemoryStore<String> = InMemoryStore::new();
        assert!(matches!(
            store.update("missing", "x".to_string()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store: InMemoryStore<String> = InMemoryStore::new();
        store.create("a", "hello".to_string()).await.unwrap();
        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }
}

use crate::store::RecordStore;
use conductor_core::{ConductorError, ConductorResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed handle on one collection of a [`RecordStore`].
pub struct Collection<T> {
    store: Arc<dyn RecordStore>,
    name: &'static str,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            name: self.name,
            _record: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> Collection<T> {
    /// Binds `name` on `store`.
    pub fn new(store: Arc<dyn RecordStore>, name: &'static str) -> Self {
        Self {
            store,
            name,
            _record: PhantomData,
        }
    }

    /// Collection name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Inserts a new record.
    pub async fn create(&self, id: &str, record: &T) -> ConductorResult<()> {
        self.store
            .create(self.name, id, serde_json::to_value(record)?)
            .await
    }

    /// Inserts or replaces a record.
    pub async fn update(&self, id: &str, record: &T) -> ConductorResult<()> {
        self.store
            .update(self.name, id, serde_json::to_value(record)?)
            .await
    }

    /// Fetches and decodes a record.
    pub async fn get(&self, id: &str) -> ConductorResult<Option<T>> {
        match self.store.get(self.name, id).await? {
            Some(value) => Ok(Some(self.decode(value)?)),
            None => Ok(None),
        }
    }

    /// Decodes every record of the collection.
    pub async fn list(&self) -> ConductorResult<Vec<T>> {
        self.store
            .list(self.name)
            .await?
            .into_iter()
            .map(|value| self.decode(value))
            .collect()
    }

    fn decode(&self, value: serde_json::Value) -> ConductorResult<T> {
        serde_json::from_value(value)
            .map_err(|e| ConductorError::Store(format!("Corrupt record in '{}': {e}", self.name)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Run {
        id: uuid::Uuid,
        success: bool,
    }

    #[tokio::test]
    async fn test_typed_collection() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let runs: Collection<Run> = Collection::new(store.clone(), "runs");

        let run = Run {
            id: uuid::Uuid::new_v4(),
            success: true,
        };
        runs.create(&run.id.to_string(), &run).await.unwrap();
        assert_eq!(runs.get(&run.id.to_string()).await.unwrap(), Some(run));
        assert_eq!(runs.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_store_error() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        store
            .update("runs", "x", serde_json::json!({"unexpected": 1}))
            .await
            .unwrap();
        let runs: Collection<Run> = Collection::new(store, "runs");
        assert!(matches!(runs.get("x").await, Err(ConductorError::Store(_))));
    }
}

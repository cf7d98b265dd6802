use crate::store::{check_key, RecordStore};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

type Records = BTreeMap<String, serde_json::Value>;

/// Store that keeps everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Records>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(
        &self,
        collection: &str,
        id: &str,
        record: serde_json::Value,
    ) -> ConductorResult<()> {
        check_key("collection", collection)?;
        check_key("id", id)?;
        let mut collections = self.collections.write();
        let records = collections.entry(collection.to_string()).or_default();
        if records.contains_key(id) {
            return Err(ConductorError::Validation(format!(
                "record '{id}' already exists in '{collection}'"
            )));
        }
        records.insert(id.to_string(), record);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> ConductorResult<Option<serde_json::Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|records| records.get(id))
            .cloned())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        record: serde_json::Value,
    ) -> ConductorResult<()> {
        check_key("collection", collection)?;
        check_key("id", id)?;
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), record);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> ConductorResult<()> {
        if let Some(records) = self.collections.write().get_mut(collection) {
            records.remove(id);
        }
        Ok(())
    }

    async fn list(&self, collection: &str) -> ConductorResult<Vec<serde_json::Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }
}

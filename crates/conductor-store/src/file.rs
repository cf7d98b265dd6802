use crate::store::{check_key, RecordStore};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use std::path::PathBuf;
use tracing::warn;

/// File-based store: one pretty-printed JSON file per record,
/// `<root>/<collection>/<id>.json`.
pub struct FileRecordStore {
    root: PathBuf,
}

impl FileRecordStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub async fn new(root: PathBuf) -> ConductorResult<Self> {
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn record_path(&self, collection: &str, id: &str) -> ConductorResult<PathBuf> {
        check_key("collection", collection)?;
        check_key("id", id)?;
        Ok(self.root.join(collection).join(format!("{id}.json")))
    }

    async fn write(&self, path: PathBuf, record: &serde_json::Value) -> ConductorResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(record)?;
        // Readers never observe a partially written record.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn create(
        &self,
        collection: &str,
        id: &str,
        record: serde_json::Value,
    ) -> ConductorResult<()> {
        let path = self.record_path(collection, id)?;
        if tokio::fs::try_exists(&path).await? {
            return Err(ConductorError::Validation(format!(
                "record '{id}' already exists in '{collection}'"
            )));
        }
        self.write(path, &record).await
    }

    async fn get(&self, collection: &str, id: &str) -> ConductorResult<Option<serde_json::Value>> {
        let path = self.record_path(collection, id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let record = serde_json::from_str(&data).map_err(|e| {
            ConductorError::Store(format!("Failed to parse {collection}/{id}: {e}"))
        })?;
        Ok(Some(record))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        record: serde_json::Value,
    ) -> ConductorResult<()> {
        let path = self.record_path(collection, id)?;
        self.write(path, &record).await
    }

    async fn delete(&self, collection: &str, id: &str) -> ConductorResult<()> {
        let path = self.record_path(collection, id)?;
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn list(&self, collection: &str) -> ConductorResult<Vec<serde_json::Value>> {
        check_key("collection", collection)?;
        let dir = self.root.join(collection);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".json") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        let mut records = Vec::with_capacity(names.len());
        for name in names {
            let data = tokio::fs::read_to_string(dir.join(&name)).await?;
            match serde_json::from_str(&data) {
                Ok(record) => records.push(record),
                Err(e) => warn!(collection, file = %name, error = %e, "Skipping unreadable record"),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileRecordStore::new(tmp.path().to_path_buf()).await.unwrap();

        store
            .create("workflow_executions", "e1", json!({"status": "running"}))
            .await
            .unwrap();
        store
            .update("workflow_executions", "e1", json!({"status": "completed"}))
            .await
            .unwrap();

        let loaded = store.get("workflow_executions", "e1").await.unwrap().unwrap();
        assert_eq!(loaded["status"], "completed");
        assert!(tmp.path().join("workflow_executions/e1.json").exists());
    }

    #[tokio::test]
    async fn test_file_store_missing_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileRecordStore::new(tmp.path().to_path_buf()).await.unwrap();
        assert!(store.get("runs", "nope").await.unwrap().is_none());
        assert!(store.list("runs").await.unwrap().is_empty());
        store.delete("runs", "nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_escape() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileRecordStore::new(tmp.path().to_path_buf()).await.unwrap();
        let err = store.update("runs", "../../x", json!(1)).await.unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_file_store_list_skips_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileRecordStore::new(tmp.path().to_path_buf()).await.unwrap();
        store.update("runs", "a", json!({"n": 1})).await.unwrap();
        tokio::fs::write(tmp.path().join("runs/b.json"), "{not json")
            .await
            .unwrap();
        let records = store.list("runs").await.unwrap();
        assert_eq!(records, vec![json!({"n": 1})]);
    }
}

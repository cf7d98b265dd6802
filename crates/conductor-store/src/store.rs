use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};

/// Generic record store keyed by `(collection, id)`.
///
/// Records are opaque JSON values; typed access goes through
/// [`Collection`](crate::Collection).
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a new record. Fails if the id is already taken.
    async fn create(&self, collection: &str, id: &str, record: serde_json::Value)
        -> ConductorResult<()>;

    /// Fetches a record, `None` if absent.
    async fn get(&self, collection: &str, id: &str) -> ConductorResult<Option<serde_json::Value>>;

    /// Inserts or replaces a record.
    async fn update(&self, collection: &str, id: &str, record: serde_json::Value)
        -> ConductorResult<()>;

    /// Removes a record. Removing an absent record is not an error.
    async fn delete(&self, collection: &str, id: &str) -> ConductorResult<()>;

    /// All records of a collection, ordered by id.
    async fn list(&self, collection: &str) -> ConductorResult<Vec<serde_json::Value>>;
}

/// Rejects names that could escape the store's namespace.
pub(crate) fn check_key(kind: &str, key: &str) -> ConductorResult<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !key.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(ConductorError::Validation(format!("invalid {kind} '{key}'")))
    }
}

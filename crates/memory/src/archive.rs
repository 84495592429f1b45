//! Content archive: durable side storage for WARM and COLD block text.

use async_trait::async_trait;
use recollect_core::{BlockId, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Holds full block content while the live record is compacted.
///
/// The in-memory implementation below backs tests and ephemeral engines;
/// a durable store implements the same trait.
#[async_trait]
pub trait ContentArchive: Send + Sync {
    fn name(&self) -> &str;

    async fn put(&self, id: &BlockId, content: String) -> Result<(), StoreError>;

    async fn get(&self, id: &BlockId) -> Result<Option<String>, StoreError>;

    /// Drop archived content. Missing entries are not an error.
    async fn remove(&self, id: &BlockId) -> Result<(), StoreError>;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// An archive that keeps content in a map.
pub struct InMemoryArchive {
    entries: Arc<RwLock<HashMap<BlockId, String>>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryArchive {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentArchive for InMemoryArchive {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn put(&self, id: &BlockId, content: String) -> Result<(), StoreError> {
        self.entries.write().await.insert(id.clone(), content);
        Ok(())
    }

    async fn get(&self, id: &BlockId) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(id).cloned())
    }

    async fn remove(&self, id: &BlockId) -> Result<(), StoreError> {
        self.entries.write().await.remove(id);
        Ok(())
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_remove() {
        let archive = InMemoryArchive::new();
        let id = BlockId::from("b1");
        archive.put(&id, "full text".into()).await.unwrap();
        assert_eq!(archive.get(&id).await.unwrap().as_deref(), Some("full text"));
        assert_eq!(archive.len().await, 1);

        archive.remove(&id).await.unwrap();
        assert!(archive.get(&id).await.unwrap().is_none());
        assert!(archive.is_empty().await);
    }

    #[tokio::test]
    async fn removing_missing_entry_is_ok() {
        let archive = InMemoryArchive::new();
        assert!(archive.remove(&BlockId::from("nope")).await.is_ok());
    }
}

//! JSON-file item store.

use super::{ItemStore, ListingItem, sort_newest_first};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Stores the whole history as one pretty-printed JSON array.
pub struct LocalItemStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LocalItemStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Vec<ListingItem>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::storage(format!("Failed to read {}: {}", self.path.display(), e))),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "history file is corrupt");
            AppError::storage(format!("History file {} is corrupt: {}", self.path.display(), e))
        })
    }

    async fn write(&self, items: &[ListingItem]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(items)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), count = items.len(), "history written");
        Ok(())
    }
}

#[async_trait]
impl ItemStore for LocalItemStore {
    async fn list(&self) -> Result<Vec<ListingItem>> {
        let _guard = self.lock.lock().await;
        let mut items = self.read().await?;
        sort_newest_first(&mut items);
        Ok(items)
    }

    async fn save(&self, item: &ListingItem) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut items = self.read().await?;
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item.clone(),
            None => items.push(item.clone()),
        }
        sort_newest_first(&mut items);
        self.write(&items).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut items = self.read().await?;
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() == before {
            debug!(id, "delete of unknown item ignored");
            return Ok(());
        }
        self.write(&items).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tests::item;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = LocalItemStore::new(dir.path().join("nested").join("history.json"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_upserts_and_lists_newest_first() {
        let dir = tempdir().unwrap();
        let store = LocalItemStore::new(dir.path().join("history.json"));

        store.save(&item("old", 10)).await.unwrap();
        store.save(&item("new", 20)).await.unwrap();
        let mut edited = item("old", 10);
        edited.description = "Edited".into();
        store.save(&edited).await.unwrap();

        let items = store.list().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "new");
        assert_eq!(items[1].description, "Edited");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = LocalItemStore::new(dir.path().join("history.json"));
        store.save(&item("a", 1)).await.unwrap();

        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_storage_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = LocalItemStore::new(&path);
        assert!(matches!(store.list().await, Err(AppError::Storage(_))));
    }
}

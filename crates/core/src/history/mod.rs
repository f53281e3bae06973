//! Listing history.
//!
//! A saved listing is a [`ListingItem`]. Where items live is behind the
//! [`ItemStore`] trait:
//!
//! - [`LocalItemStore`]: JSON file in the data directory
//! - [`RemoteItemStore`]: REST backend
//! - [`SyncedItemStore`]: local first, with writes queued in a
//!   [`SyncQueue`] and pushed to the remote when it is reachable

pub mod local;
pub mod remote;
pub mod sync_queue;

pub use local::LocalItemStore;
pub use remote::RemoteItemStore;
pub use sync_queue::{PendingOp, PendingOpKind, SyncQueue};

use crate::error::Result;
use crate::providers::{AnalysisResult, is_missing_value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Structured details of a saved item. Absent means unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl ItemDetails {
    pub fn from_result(result: &AnalysisResult) -> Self {
        let known = |value: &str| (!is_missing_value(value)).then(|| value.trim().to_string());
        Self {
            brand: known(&result.brand),
            item_type: known(&result.item_type),
            color: known(&result.color),
            size: known(&result.size),
            material: known(&result.material),
            condition: known(&result.condition),
            style: known(&result.style),
        }
    }
}

/// A persisted listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingItem {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Photos as data URLs.
    #[serde(default)]
    pub photos: Vec<String>,
    pub description: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_new: Option<f64>,
    pub currency: String,
    #[serde(default)]
    pub details: ItemDetails,
    #[serde(default)]
    pub similar_links: Vec<String>,
}

impl ListingItem {
    /// Field values in the shape the review screen edits.
    pub fn to_result(&self) -> AnalysisResult {
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        AnalysisResult {
            description: self.description.clone(),
            price: self.price,
            price_new: self.price_new,
            brand: text(&self.details.brand),
            item_type: text(&self.details.item_type),
            color: text(&self.details.color),
            size: text(&self.details.size),
            material: text(&self.details.material),
            condition: text(&self.details.condition),
            style: text(&self.details.style),
            similar_links: self.similar_links.clone(),
        }
    }
}

/// Persistence gateway for listings.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// All items, newest first.
    async fn list(&self) -> Result<Vec<ListingItem>>;

    /// Inserts or replaces the item with the same id.
    async fn save(&self, item: &ListingItem) -> Result<()>;

    /// Removes the item; unknown ids are not an error.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Orders items newest first, breaking ties by id.
pub(crate) fn sort_newest_first(items: &mut [ListingItem]) {
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
}

/// Local store whose writes are mirrored to a remote through a [`SyncQueue`].
///
/// Reads and writes always hit the local store, so history keeps working
/// offline. Every write is queued, then the queue is flushed; ops that fail
/// stay queued for the next flush.
pub struct SyncedItemStore {
    local: LocalItemStore,
    queue: SyncQueue,
    remote: Option<Arc<dyn ItemStore>>,
    user: String,
}

impl SyncedItemStore {
    pub fn new(local: LocalItemStore, queue: SyncQueue, remote: Option<Arc<dyn ItemStore>>, user: impl Into<String>) -> Self {
        Self {
            local,
            queue,
            remote,
            user: user.into(),
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Number of writes not yet pushed to the remote.
    pub async fn pending_count(&self) -> usize {
        self.queue.pending_count(&self.user).await
    }

    /// Pushes queued writes. Returns how many are still pending.
    #[instrument(skip(self), fields(user = %self.user))]
    pub async fn flush(&self) -> Result<usize> {
        match &self.remote {
            Some(remote) => self.queue.flush(&self.user, remote.as_ref()).await,
            None => Ok(self.pending_count().await),
        }
    }

    /// Pulls the remote list and merges it into the local store.
    ///
    /// Local items with pending writes keep their local version.
    #[instrument(skip(self), fields(user = %self.user))]
    pub async fn pull(&self) -> Result<usize> {
        let Some(remote) = &self.remote else {
            return Ok(0);
        };
        let pending: Vec<String> = self
            .queue
            .pending(&self.user)
            .await
            .into_iter()
            .map(|op| op.item_id)
            .collect();

        let mut merged = 0;
        for item in remote.list().await? {
            if pending.contains(&item.id) {
                continue;
            }
            self.local.save(&item).await?;
            merged += 1;
        }
        debug!(merged, "remote items merged");
        Ok(merged)
    }

    async fn flush_opportunistically(&self) {
        if self.remote.is_none() {
            return;
        }
        if let Err(e) = self.flush().await {
            warn!(error = %e, "sync flush failed; writes stay queued");
        }
    }
}

#[async_trait]
impl ItemStore for SyncedItemStore {
    async fn list(&self) -> Result<Vec<ListingItem>> {
        self.local.list().await
    }

    async fn save(&self, item: &ListingItem) -> Result<()> {
        self.local.save(item).await?;
        if self.remote.is_some() {
            self.queue.enqueue_upsert(&self.user, item).await?;
            self.flush_opportunistically().await;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.local.delete(id).await?;
        if self.remote.is_some() {
            self.queue.enqueue_delete(&self.user, id).await?;
            self.flush_opportunistically().await;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    pub(crate) fn item(id: &str, timestamp: i64) -> ListingItem {
        ListingItem {
            id: id.to_string(),
            timestamp,
            photos: vec![],
            description: format!("Item {}", id),
            price: 100.0,
            price_new: None,
            currency: "DKK".to_string(),
            details: ItemDetails::default(),
            similar_links: vec![],
        }
    }

    /// In-memory remote that can be switched offline.
    #[derive(Default)]
    pub(crate) struct FlakyRemote {
        pub offline: AtomicBool,
        pub items: Mutex<Vec<ListingItem>>,
    }

    impl FlakyRemote {
        fn check(&self) -> Result<()> {
            if self.offline.load(Ordering::SeqCst) {
                Err(AppError::network("offline"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ItemStore for FlakyRemote {
        async fn list(&self) -> Result<Vec<ListingItem>> {
            self.check()?;
            Ok(self.items.lock().unwrap().clone())
        }

        async fn save(&self, item: &ListingItem) -> Result<()> {
            self.check()?;
            let mut items = self.items.lock().unwrap();
            items.retain(|i| i.id != item.id);
            items.push(item.clone());
            Ok(())
        }

        async fn delete(&self, id: &str) -> Result<()> {
            self.check()?;
            self.items.lock().unwrap().retain(|i| i.id != id);
            Ok(())
        }
    }

    #[test]
    fn details_drop_unknown_values() {
        let result = AnalysisResult {
            description: "Jakke".into(),
            brand: "Ukendt".into(),
            color: " Blå ".into(),
            ..AnalysisResult::default()
        };
        let details = ItemDetails::from_result(&result);
        assert_eq!(details.brand, None);
        assert_eq!(details.color.as_deref(), Some("Blå"));
        assert_eq!(details.size, None);
    }

    #[test]
    fn item_json_uses_camel_case() {
        let mut saved = item("a", 5);
        saved.price_new = Some(900.0);
        saved.details.item_type = Some("Sofa".into());
        let json = serde_json::to_value(&saved).unwrap();
        assert_eq!(json["priceNew"], 900.0);
        assert_eq!(json["details"]["type"], "Sofa");
        assert!(json["details"].get("brand").is_none());
    }

    #[tokio::test]
    async fn offline_writes_are_queued_then_flushed() {
        let dir = tempdir().unwrap();
        let remote = Arc::new(FlakyRemote::default());
        remote.offline.store(true, Ordering::SeqCst);

        let store = SyncedItemStore::new(
            LocalItemStore::new(dir.path().join("history.json")),
            SyncQueue::new(dir.path().join("pending.json")),
            Some(remote.clone() as Arc<dyn ItemStore>),
            "anna",
        );

        store.save(&item("a", 1)).await.unwrap();
        store.save(&item("b", 2)).await.unwrap();
        store.delete("a").await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 1);
        assert_eq!(store.pending_count().await, 2);

        remote.offline.store(false, Ordering::SeqCst);
        assert_eq!(store.flush().await.unwrap(), 0);
        let remote_ids: Vec<String> = remote.items.lock().unwrap().iter().map(|i| i.id.clone()).collect();
        assert_eq!(remote_ids, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn pull_keeps_locally_pending_versions() {
        let dir = tempdir().unwrap();
        let remote = Arc::new(FlakyRemote::default());
        remote.items.lock().unwrap().extend([item("a", 1), item("r", 3)]);
        remote.offline.store(true, Ordering::SeqCst);

        let store = SyncedItemStore::new(
            LocalItemStore::new(dir.path().join("history.json")),
            SyncQueue::new(dir.path().join("pending.json")),
            Some(remote.clone() as Arc<dyn ItemStore>),
            "anna",
        );
        let mut edited = item("a", 1);
        edited.price = 999.0;
        store.save(&edited).await.unwrap();

        remote.offline.store(false, Ordering::SeqCst);
        assert_eq!(store.pull().await.unwrap(), 1);

        let items = store.list().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "r");
        assert_eq!(items[1].price, 999.0);
    }

    #[tokio::test]
    async fn without_remote_nothing_is_queued() {
        let dir = tempdir().unwrap();
        let store = SyncedItemStore::new(
            LocalItemStore::new(dir.path().join("history.json")),
            SyncQueue::new(dir.path().join("pending.json")),
            None,
            "local",
        );
        store.save(&item("a", 1)).await.unwrap();
        assert_eq!(store.pending_count().await, 0);
        assert_eq!(store.flush().await.unwrap(), 0);
    }
}

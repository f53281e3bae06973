//! Offline write queue.
//!
//! Pending remote writes are kept in a JSON file, one op per `(user, item)`
//! pair: a newer op for the same item replaces the older one (last write
//! wins) and the queue stays ordered by `queued_at`.

use super::{ItemStore, ListingItem};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PendingOpKind {
    Upsert { item: ListingItem },
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOp {
    pub user_id: String,
    pub item_id: String,
    #[serde(flatten)]
    pub kind: PendingOpKind,
    pub queued_at: i64,
    pub attempts: u32,
}

impl PendingOp {
    fn same_key(&self, other: &PendingOp) -> bool {
        self.user_id == other.user_id && self.item_id == other.item_id
    }

    fn same_op(&self, other: &PendingOp) -> bool {
        self.same_key(other) && self.queued_at == other.queued_at
    }
}

/// Keeps the newest op per `(user, item)`, ordered by `queued_at`.
pub fn compact(ops: Vec<PendingOp>) -> Vec<PendingOp> {
    let mut kept: Vec<PendingOp> = Vec::with_capacity(ops.len());
    for op in ops {
        kept.retain(|existing| !existing.same_key(&op));
        kept.push(op);
    }
    kept.sort_by_key(|op| op.queued_at);
    kept
}

pub struct SyncQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SyncQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn enqueue_upsert(&self, user: &str, item: &ListingItem) -> Result<()> {
        self.enqueue(user, &item.id, PendingOpKind::Upsert { item: item.clone() })
            .await
    }

    pub async fn enqueue_delete(&self, user: &str, item_id: &str) -> Result<()> {
        self.enqueue(user, item_id, PendingOpKind::Delete).await
    }

    /// Ops waiting for `user`, oldest first.
    pub async fn pending(&self, user: &str) -> Vec<PendingOp> {
        let _guard = self.lock.lock().await;
        self.read().await.into_iter().filter(|op| op.user_id == user).collect()
    }

    pub async fn pending_count(&self, user: &str) -> usize {
        self.pending(user).await.len()
    }

    /// Replays `user`'s ops against `remote` in order.
    ///
    /// Failed ops stay queued with `attempts + 1`; ops for other users and
    /// ops queued while the flush ran are untouched. Returns how many of
    /// `user`'s ops are still pending.
    pub async fn flush(&self, user: &str, remote: &dyn ItemStore) -> Result<usize> {
        let ops = self.pending(user).await;
        if ops.is_empty() {
            return Ok(0);
        }

        let mut done = Vec::new();
        let mut failed = Vec::new();
        for op in ops {
            let outcome = match &op.kind {
                PendingOpKind::Upsert { item } => remote.save(item).await,
                PendingOpKind::Delete => remote.delete(&op.item_id).await,
            };
            match outcome {
                Ok(()) => done.push(op),
                Err(e) => {
                    warn!(item = %op.item_id, attempts = op.attempts + 1, error = %e, "sync op failed");
                    failed.push(op);
                }
            }
        }

        let _guard = self.lock.lock().await;
        let current = self.read().await;
        let next: Vec<PendingOp> = current
            .into_iter()
            .filter(|op| !done.iter().any(|d| d.same_op(op)))
            .map(|mut op| {
                if failed.iter().any(|f| f.same_op(&op)) {
                    op.attempts += 1;
                }
                op
            })
            .collect();
        let next = compact(next);
        self.write(&next).await?;

        let remaining = next.iter().filter(|op| op.user_id == user).count();
        info!(user, pushed = done.len(), remaining, "sync queue flushed");
        Ok(remaining)
    }

    async fn enqueue(&self, user: &str, item_id: &str, kind: PendingOpKind) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut ops = self.read().await;
        let latest = ops.iter().map(|op| op.queued_at).max().unwrap_or(i64::MIN);
        ops.push(PendingOp {
            user_id: user.to_string(),
            item_id: item_id.to_string(),
            kind,
            queued_at: super::now_millis().max(latest.saturating_add(1)),
            attempts: 0,
        });
        let ops = compact(ops);
        debug!(user, item = item_id, queued = ops.len(), "sync op queued");
        self.write(&ops).await
    }

    /// Unreadable queues are treated as empty.
    async fn read(&self) -> Vec<PendingOp> {
        let Ok(raw) = tokio::fs::read_to_string(&self.path).await else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "discarding unreadable sync queue");
            Vec::new()
        })
    }

    async fn write(&self, ops: &[PendingOp]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(ops)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| AppError::storage(format!("Failed to write {}: {}", self.path.display(), e)))
    }
}

//! Running totals of provider usage.
//!
//! The ledger is telemetry: failures to read or write it are logged and
//! never interrupt an analysis.

use crate::providers::Usage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageTotals {
    pub runs: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
}

impl UsageTotals {
    /// Adds one successful run. Missing counters count as zero; a missing
    /// total falls back to prompt + completion.
    pub fn record(&mut self, usage: Option<&Usage>) {
        self.runs += 1;
        let Some(usage) = usage else {
            return;
        };
        let prompt = usage.prompt_tokens.unwrap_or(0);
        let completion = usage.completion_tokens.unwrap_or(0);
        self.prompt_tokens += prompt;
        self.completion_tokens += completion;
        self.total_tokens += usage.total_tokens.unwrap_or(prompt + completion);
        self.cost_usd += usage.cost_usd.unwrap_or(0.0);
    }
}

/// File-backed [`UsageTotals`].
pub struct UsageLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl UsageLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current totals; zero when the file is missing or unreadable.
    pub async fn totals(&self) -> UsageTotals {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    /// Records one run and returns the new totals.
    pub async fn record(&self, usage: Option<&Usage>) -> UsageTotals {
        let _guard = self.lock.lock().await;
        let mut totals = self.read().await;
        totals.record(usage);
        if let Err(e) = self.write(&totals).await {
            warn!(path = %self.path.display(), error = %e, "failed to persist usage totals");
        } else {
            debug!(runs = totals.runs, total_tokens = totals.total_tokens, "usage recorded");
        }
        totals
    }

    async fn read(&self) -> UsageTotals {
        let Ok(raw) = tokio::fs::read_to_string(&self.path).await else {
            return UsageTotals::default();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "usage ledger unreadable; starting from zero");
            UsageTotals::default()
        })
    }

    async fn write(&self, totals: &UsageTotals) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(totals).map_err(std::io::Error::other)?;
        tokio::fs::write(&self.path, json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn accumulates_across_runs() {
        let dir = tempdir().unwrap();
        let ledger = UsageLedger::new(dir.path().join("usage.json"));

        ledger.record(Some(&Usage {
            prompt_tokens: Some(100),
            completion_tokens: Some(20),
            total_tokens: None,
            cost_usd: Some(0.5),
        }))
        .await;
        ledger.record(None).await;
        let totals = ledger
            .record(Some(&Usage {
                total_tokens: Some(10),
                ..Usage::default()
            }))
            .await;

        assert_eq!(totals.runs, 3);
        assert_eq!(totals.prompt_tokens, 100);
        assert_eq!(totals.total_tokens, 130);
        assert_eq!(ledger.totals().await, totals);
        assert_eq!(totals.cost_usd, 0.5);
    }

    #[tokio::test]
    async fn unwritable_ledger_does_not_fail() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("blocker"), "file").unwrap();
        let ledger = UsageLedger::new(dir.path().join("blocker").join("usage.json"));
        assert_eq!(ledger.record(None).await.runs, 1);
        assert_eq!(ledger.totals().await.runs, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_runs_are_all_counted() {
        let dir = tempdir().unwrap();
        let ledger = UsageLedger::new(dir.path().join("usage.json"));
        let one = Usage {
            total_tokens: Some(5),
            ..Usage::default()
        };
        tokio::join!(ledger.record(Some(&one)), ledger.record(Some(&one)), ledger.record(None));

        let totals = ledger.totals().await;
        assert_eq!(totals.runs, 3);
        assert_eq!(totals.total_tokens, 10);
    }
}

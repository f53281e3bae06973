//! Snaplist Core Library
//!
//! This library provides the core functionality for snaplist, a tool that
//! turns photos of a secondhand item into a draft resale listing using a
//! multimodal AI model.
//!
//! # Overview
//!
//! A listing is produced in one pass: capture → analyze → review → save.
//! The library handles:
//!
//! - **Photo intake**: ordered, time-bounded loading via [`capture`]
//! - **Image Processing**: normalize, rotate, crop export and data URLs via [`image_processing`]
//! - **Cropping**: the crop rectangle rules in [`crop`] and the window in [`ui`]
//! - **AI Integration**: five provider backends behind one trait in [`providers`]
//! - **Review**: the edit state machine in [`review`]
//! - **History**: local item store with optional remote sync in [`history`]
//!
//! # Quick Start
//!
//! The simplest way to use the library is through the [`Snaplist`] facade:
//!
//! ```ignore
//! use snaplist_core::{Snaplist, review::ReviewSession};
//!
//! let app = Snaplist::new()?;
//! let mut session = ReviewSession::new(&app.settings().currency);
//! for photo in app.photos().load(&paths, &cancel).await? {
//!     session.add_photo(photo.to_data_url())?;
//! }
//!
//! let ticket = session.begin_analysis(None)?;
//! let outcome = app.analyze(&ticket).await;
//! session.complete(&ticket, outcome)?;
//! app.save(&mut session).await?;
//! ```
//!
//! # Module Structure
//!
//! - [`analysis`]: provider/model selection, timeout and cancellation
//! - [`capture`]: photo loading
//! - [`config`]: environment configuration
//! - [`crop`]: crop geometry and session
//! - [`error`]: error types and result aliases
//! - [`history`]: listing persistence and sync
//! - [`image_processing`]: image manipulation utilities
//! - [`prompt`]: prompt construction
//! - [`providers`]: AI backends and result normalisation
//! - [`review`]: review/edit state machine
//! - [`settings`]: persisted user preferences
//! - [`ui`]: crop window
//! - [`usage`]: token and cost totals

pub mod analysis;
pub mod capture;
pub mod config;
pub mod crop;
pub mod error;
pub mod history;
pub mod image_processing;
pub mod prompt;
pub mod providers;
pub mod review;
pub mod settings;
pub mod ui;
pub mod usage;

// Re-export primary types for convenience
pub use analysis::Analyzer;
pub use capture::PhotoSource;
pub use config::Config;
pub use error::{AppError, Result};
pub use history::{ItemStore, ListingItem};
pub use providers::{AnalysisResult, ProviderKind};
pub use review::{ReviewSession, Ticket};
pub use settings::Settings;

use config::ProviderStatus;
use directories::ProjectDirs;
use history::{LocalItemStore, RemoteItemStore, SyncQueue, SyncedItemStore};
use providers::VisionProvider;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use usage::{UsageLedger, UsageTotals};

/// Audit log target for listing lifecycle events.
pub const AUDIT_TARGET: &str = "snaplist::audit";

/// Where snaplist keeps its files.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    /// Settings file; `None` keeps settings in memory only.
    pub settings: Option<PathBuf>,
    /// Directory for history, the sync queue and usage totals.
    pub data_dir: PathBuf,
}

impl StoragePaths {
    /// Platform config and data directories.
    pub fn platform() -> Result<Self> {
        let dirs = ProjectDirs::from("", "snaplist", "snaplist")
            .ok_or_else(|| AppError::storage("Could not determine the data directory"))?;
        Ok(Self {
            settings: Settings::config_path(),
            data_dir: dirs.data_dir().to_path_buf(),
        })
    }

    /// Everything under one directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            settings: Some(dir.join("settings.json")),
            data_dir: dir,
        }
    }

    pub fn history(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }

    pub fn sync_queue(&self) -> PathBuf {
        self.data_dir.join("sync_queue.json")
    }

    pub fn usage(&self) -> PathBuf {
        self.data_dir.join("usage.json")
    }
}

/// Outcome of [`Snaplist::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote items merged into local history.
    pub pulled: usize,
    /// Local writes still waiting for the remote.
    pub pending: usize,
}

/// Main entry point for the snaplist application.
///
/// This struct provides a facade over the various subsystems, handling
/// initialization and orchestration. The review state itself lives in a
/// [`ReviewSession`] owned by the caller, so a front end can discard or
/// restart it while a call is in flight.
pub struct Snaplist {
    config: Config,
    settings: Settings,
    paths: StoragePaths,
    analyzer: Analyzer,
    store: SyncedItemStore,
    usage: UsageLedger,
    photos: PhotoSource,
}

impl Snaplist {
    /// Creates a new instance from the environment and the platform
    /// directories.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A configuration variable is malformed
    /// - The platform data directory cannot be determined
    pub fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::open(config, StoragePaths::platform()?)
    }

    /// Creates an instance with custom configuration and storage locations.
    ///
    /// Settings are read from `paths.settings`; a missing or corrupt file
    /// yields the defaults.
    pub fn open(config: Config, paths: StoragePaths) -> Result<Self> {
        let settings = paths
            .settings
            .as_deref()
            .map(Settings::load_from)
            .unwrap_or_default();

        let remote = RemoteItemStore::from_config(&config)?.map(|store| Arc::new(store) as Arc<dyn ItemStore>);
        let store = SyncedItemStore::new(
            LocalItemStore::new(paths.history()),
            SyncQueue::new(paths.sync_queue()),
            remote,
            config.user_id.clone(),
        );

        Ok(Self {
            analyzer: Analyzer::new(config.clone()),
            photos: PhotoSource::from_config(&config),
            usage: UsageLedger::new(paths.usage()),
            config,
            settings,
            paths,
            store,
        })
    }

    /// Routes every analysis to `provider` instead of the configured one.
    pub fn with_provider(mut self, provider: Arc<dyn VisionProvider>) -> Self {
        self.analyzer = Analyzer::with_provider(self.config.clone(), provider);
        self
    }

    /// Returns a reference to the current configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn photos(&self) -> &PhotoSource {
        &self.photos
    }

    /// Provider and model the next analysis will use.
    pub fn selection(&self) -> (ProviderKind, String) {
        self.analyzer.selection(&self.settings)
    }

    /// For each provider, whether its credential is configured.
    pub fn provider_statuses(&self) -> Vec<ProviderStatus> {
        self.config.provider_statuses()
    }

    /// Sets one setting by key and persists the result.
    ///
    /// An invalid value is rejected; a failed write only logs a warning.
    pub fn set_setting(&mut self, key: &str, value: &str) -> Result<()> {
        self.settings.set(key, value)?;
        self.persist_settings();
        Ok(())
    }

    /// Restores default settings and persists them.
    pub fn reset_settings(&mut self) {
        self.settings.reset();
        self.persist_settings();
    }

    fn persist_settings(&self) {
        let Some(path) = &self.paths.settings else {
            return;
        };
        if let Err(e) = self.settings.save_to(path) {
            warn!(path = %path.display(), error = %e, "failed to save settings");
        }
    }

    /// Runs the analysis a ticket asks for and records usage on success.
    ///
    /// Pass the outcome straight to [`ReviewSession::complete`].
    pub async fn analyze(&self, ticket: &Ticket) -> Result<AnalysisResult> {
        let response = self
            .analyzer
            .analyze(ticket.images(), &self.settings, ticket.context(), ticket.cancel_token())
            .await?;
        self.usage.record(response.usage.as_ref()).await;
        Ok(response.result)
    }

    /// Persists the session's draft and moves the session to `saved`.
    ///
    /// On failure the error is recorded on the session, which stays in
    /// `reviewing` with the draft intact.
    pub async fn save(&self, session: &mut ReviewSession) -> Result<ListingItem> {
        let item = session.to_listing()?;
        let updated = session.draft().is_some_and(|draft| draft.id.is_some());

        if let Err(e) = self.store.save(&item).await {
            session.record_error(&e);
            return Err(e);
        }
        session.mark_saved(&item)?;

        info!(
            target: AUDIT_TARGET,
            event = "item_created",
            id = %item.id,
            updated,
            price = item.price,
            currency = %item.currency,
            photos = item.photos.len(),
        );
        Ok(item)
    }

    /// All saved listings, newest first.
    pub async fn history(&self) -> Result<Vec<ListingItem>> {
        self.store.list().await
    }

    /// Looks up a saved listing by id.
    pub async fn find(&self, id: &str) -> Result<Option<ListingItem>> {
        Ok(self.store.list().await?.into_iter().find(|item| item.id == id))
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id).await?;
        info!(target: AUDIT_TARGET, event = "item_deleted", id = %id);
        Ok(())
    }

    /// Pushes queued writes, then pulls remote listings.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when no sync endpoint is configured.
    pub async fn sync(&self) -> Result<SyncReport> {
        if !self.store.has_remote() {
            return Err(AppError::config("No sync endpoint configured (set SNAPLIST_SYNC_URL)"));
        }
        let pending = self.store.flush().await?;
        let pulled = self.store.pull().await?;
        Ok(SyncReport { pulled, pending })
    }

    /// Local writes not yet pushed to the remote.
    pub async fn pending_sync(&self) -> usize {
        self.store.pending_count().await
    }

    pub async fn usage_totals(&self) -> UsageTotals {
        self.usage.totals().await
    }
}

/// Initializes the library by loading environment variables.
///
/// Call this once at application startup before using any other functions.
/// This loads `.env` files if present.
pub fn init() {
    let _ = dotenvy::dotenv();
}

//! Photo intake.
//!
//! Photos arrive as files (or raw bytes from a camera or clipboard) and are
//! normalized before they are held in memory or sent anywhere.
//!
//! # Example
//!
//! ```ignore
//! use snaplist_core::capture::PhotoSource;
//!
//! let source = PhotoSource::from_config(&config);
//! let photos = source.load(&paths, &cancel).await?;
//! // photos[i] corresponds to paths[i]
//! ```

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::image_processing::{EncodedImage, ImageProcessor};
use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Loads and normalizes photos, each decode bounded by a timeout.
///
/// All decodes of a batch run concurrently; results are returned in input
/// order regardless of which finishes first.
#[derive(Debug, Clone)]
pub struct PhotoSource {
    decode_timeout: Duration,
}

impl PhotoSource {
    pub fn new(decode_timeout: Duration) -> Self {
        Self { decode_timeout }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.decode_timeout)
    }

    /// Loads every path, in order.
    ///
    /// # Errors
    ///
    /// Fails on the first unreadable or undecodable file, on timeout, or
    /// when `cancel` fires. Nothing is returned for a partially failed batch.
    #[instrument(skip_all, fields(count = paths.len()))]
    pub async fn load<P: AsRef<Path>>(&self, paths: &[P], cancel: &CancellationToken) -> Result<Vec<EncodedImage>> {
        let photos = try_join_all(paths.iter().map(|path| self.load_one(path.as_ref(), cancel))).await?;
        debug!(loaded = photos.len(), "photos normalized");
        Ok(photos)
    }

    pub async fn load_one(&self, path: &Path, cancel: &CancellationToken) -> Result<EncodedImage> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::image(format!("Failed to read {}: {}", path.display(), e)))?;
        self.from_bytes(bytes, cancel).await.map_err(|e| match e {
            AppError::ImageProcessing(msg) => AppError::image(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub async fn from_bytes(&self, bytes: Vec<u8>, cancel: &CancellationToken) -> Result<EncodedImage> {
        ImageProcessor::normalize_bounded(bytes, self.decode_timeout, cancel).await
    }
}

/// Photo paths listed in a directory, sorted by file name. Only common image
/// extensions are included.
pub fn photos_in_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

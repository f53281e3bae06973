//! User interface components for snaplist.
//!
//! This module provides the interactive crop window: the photo is drawn
//! letterboxed, the area outside the crop is dimmed, and the rectangle is
//! moved or resized from its corner handles. The geometry lives in
//! [`crate::crop`]; this module only maps egui input onto it and draws the
//! result.
//!
//! # Architecture
//!
//! - [`state`]: window state and worker events
//! - [`rendering`]: drawing helpers for photo, overlay, border and handles
//! - [`selection`]: pointer handling and cursor feedback
//! - [`crop_tool`]: the `eframe::App`
//!
//! # Usage
//!
//! ```ignore
//! use snaplist_core::ui;
//!
//! if let Some(cropped) = ui::run_crop_ui(&photo)? {
//!     // cropped.width or cropped.height is 1024
//! }
//! ```

mod crop_tool;
mod rendering;
mod selection;
mod state;

// Public API exports
pub use crop_tool::CropTool;
pub use state::{CropResult, CropToolState};

use crate::error::Result;
use crate::image_processing::EncodedImage;

/// Launches the crop window for one photo.
///
/// # Returns
/// - `Ok(Some(image))` - the committed crop, longest side 1024 px
/// - `Ok(None)` - the user cancelled (Escape or closing the window)
/// - `Err(e)` - the photo could not be decoded or the window failed
pub fn run_crop_ui(photo: &EncodedImage) -> Result<Option<EncodedImage>> {
    crop_tool::run(photo)
}

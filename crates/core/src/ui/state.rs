//! UI state types and event definitions.
//!
//! This module contains the crop window's state machine and the events sent
//! back from the export worker.

use crate::image_processing::EncodedImage;

/// Result of a crop window run.
///
/// Shared with the caller through an `Arc<Mutex<_>>`; `image` stays `None`
/// when the user cancels or closes the window.
#[derive(Clone, Default)]
pub struct CropResult {
    /// The committed crop, encoded.
    pub image: Option<EncodedImage>,
    /// Quarter turns applied before committing.
    pub rotations: u8,
}

/// Current state of the crop window.
///
/// `Editing` -> `Exporting` -> closed
///          \-> `Error` (export failed) -> `Editing` (on dismiss)
#[derive(Clone, Debug, PartialEq)]
pub enum CropToolState {
    /// The user is adjusting the rectangle.
    Editing,
    /// The worker is extracting and encoding the region.
    Exporting,
    /// The export failed; the rectangle is kept.
    Error(String),
}

/// Events received from the background export worker.
pub(crate) enum ExportEvent {
    Done(EncodedImage),
    Failed(String),
}

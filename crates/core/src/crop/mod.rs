//! Interactive crop engine.
//!
//! - [`geometry`]: rectangles, canvas mapping and the move/resize rules
//! - [`session`]: the pointer state machine that drives them
//!
//! The engine has no UI dependency; [`crate::ui`] feeds it egui pointer
//! events and draws its state.

pub mod geometry;
pub mod session;

pub use geometry::{
    CanvasMetrics, Corner, CropRect, HANDLE_HIT_RADIUS, ImageSize, MIN_CROP_SIZE, PixelRect, Point,
};
pub use session::{CropSession, CropState, DragSession, Interaction};

//! Pointer-driven crop session.
//!
//! A [`CropSession`] owns the crop rectangle and the current canvas layout
//! for one photo. Pointer events arrive strictly ordered (down, moves, up);
//! every move is computed against the rectangle captured at pointer-down,
//! so rapid moves never accumulate rounding error.

use super::geometry::{
    CanvasMetrics, Corner, CropRect, HANDLE_HIT_RADIUS, ImageSize, Point,
};
use crate::error::Result;
use crate::image_processing::{EncodedImage, ImageProcessor};
use image::DynamicImage;

/// What a drag is doing to the rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Move,
    Resize(Corner),
}

/// Baseline captured at pointer-down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragSession {
    pub pointer_start: Point,
    pub crop_at_start: CropRect,
    pub interaction: Interaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CropState {
    #[default]
    Idle,
    Dragging(DragSession),
}

/// Interactive crop over a single decoded photo.
pub struct CropSession {
    image: DynamicImage,
    size: ImageSize,
    crop: CropRect,
    metrics: CanvasMetrics,
    state: CropState,
}

impl CropSession {
    /// Starts a session with the default centred rectangle.
    pub fn new(image: DynamicImage) -> Self {
        let size = ImageSize::new(image.width(), image.height());
        Self {
            image,
            size,
            crop: CropRect::initial(size),
            metrics: CanvasMetrics::identity(),
            state: CropState::Idle,
        }
    }

    pub fn from_encoded(encoded: &EncodedImage) -> Result<Self> {
        Ok(Self::new(encoded.decode()?))
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn image_size(&self) -> ImageSize {
        self.size
    }

    pub fn crop(&self) -> CropRect {
        self.crop
    }

    pub fn metrics(&self) -> CanvasMetrics {
        self.metrics
    }

    pub fn state(&self) -> CropState {
        self.state
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, CropState::Dragging(_))
    }

    /// Recomputes the canvas mapping. Called on every redraw.
    pub fn layout(&mut self, canvas_width: f32, canvas_height: f32) -> CanvasMetrics {
        self.metrics = CanvasMetrics::fit(self.size, canvas_width, canvas_height);
        self.metrics
    }

    /// Rotates the photo a quarter turn clockwise and restarts the crop.
    pub fn rotate90(&mut self) {
        self.image = self.image.rotate90();
        self.size = ImageSize::new(self.image.width(), self.image.height());
        self.crop = CropRect::initial(self.size);
        self.state = CropState::Idle;
    }

    /// Canvas-space positions of the four handles.
    pub fn handle_positions(&self) -> [(Corner, Point); 4] {
        Corner::ALL.map(|corner| (corner, self.metrics.to_canvas(self.crop.corner(corner))))
    }

    /// Resolves what a pointer-down at `pos` (canvas space) would grab.
    ///
    /// Handles take priority over the body; the closest handle within
    /// [`HANDLE_HIT_RADIUS`] wins.
    pub fn hit_test(&self, pos: Point) -> Option<Interaction> {
        let nearest = self
            .handle_positions()
            .into_iter()
            .map(|(corner, p)| (corner, p.distance(pos)))
            .filter(|(_, d)| *d <= HANDLE_HIT_RADIUS)
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((corner, _)) = nearest {
            return Some(Interaction::Resize(corner));
        }

        let (min, max) = self.metrics.rect_to_canvas(&self.crop);
        let inside = pos.x >= min.x && pos.x <= max.x && pos.y >= min.y && pos.y <= max.y;
        inside.then_some(Interaction::Move)
    }

    /// Begins a drag if `pos` hits a handle or the rectangle.
    pub fn pointer_down(&mut self, pos: Point) -> Option<Interaction> {
        let interaction = self.hit_test(pos)?;
        self.state = CropState::Dragging(DragSession {
            pointer_start: pos,
            crop_at_start: self.crop,
            interaction,
        });
        Some(interaction)
    }

    /// Applies the drag from its pointer-down baseline. Returns whether the
    /// rectangle changed.
    pub fn pointer_move(&mut self, pos: Point) -> bool {
        let CropState::Dragging(drag) = self.state else {
            return false;
        };
        let delta = self.metrics.delta_to_image(Point::new(
            pos.x - drag.pointer_start.x,
            pos.y - drag.pointer_start.y,
        ));

        let next = match drag.interaction {
            Interaction::Move => CropRect::moved(drag.crop_at_start, delta, self.size),
            Interaction::Resize(corner) => {
                CropRect::resized(drag.crop_at_start, corner, delta, self.size)
            }
        };
        let changed = next != self.crop;
        self.crop = next;
        changed
    }

    /// Ends the drag (pointer up or pointer leaving the canvas).
    pub fn pointer_up(&mut self) {
        self.state = CropState::Idle;
    }

    /// Extracts and encodes the selected region; ends the session.
    pub fn commit(self) -> Result<EncodedImage> {
        let rect = self.crop.to_pixels(self.size);
        ImageProcessor::export_crop(&self.image, rect)
    }
}

//! Crop rectangle geometry.
//!
//! Two coordinate spaces are involved:
//!
//! - **image space**: pixels of the source photo. The crop rectangle lives
//!   here and is the only thing that is ever committed.
//! - **canvas space**: pixels of the on-screen drawing area, where the photo
//!   is drawn letterboxed (aspect-preserving, centred).
//!
//! [`CanvasMetrics`] is the affine map between the two. Gesture deltas
//! measured on the canvas are divided by `ratio` before being applied to
//! the rectangle.

use serde::{Deserialize, Serialize};

/// Smallest width or height a crop rectangle may shrink to, in image pixels.
pub const MIN_CROP_SIZE: f32 = 40.0;

/// Distance from a corner, in canvas pixels, that still grabs its handle.
pub const HANDLE_HIT_RADIUS: f32 = 16.0;

/// Fraction of each image dimension covered by a fresh crop.
pub const INITIAL_CROP_FRACTION: f32 = 0.7;

/// A point or delta in either coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Pixel dimensions of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn w(self) -> f32 {
        self.width as f32
    }

    fn h(self) -> f32 {
        self.height as f32
    }

    /// Minimum crop width; smaller than [`MIN_CROP_SIZE`] only when the
    /// image itself is narrower.
    fn min_w(self) -> f32 {
        MIN_CROP_SIZE.min(self.w())
    }

    fn min_h(self) -> f32 {
        MIN_CROP_SIZE.min(self.h())
    }
}

/// Integer crop region handed to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One of the four resize handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Corner {
    Nw,
    Ne,
    Sw,
    Se,
}

impl Corner {
    pub const ALL: [Corner; 4] = [Corner::Nw, Corner::Ne, Corner::Sw, Corner::Se];
}

/// Crop rectangle in image-pixel coordinates.
///
/// Every constructor and mutator keeps it inside the image and no smaller
/// than the minimum size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl CropRect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Centred rectangle covering [`INITIAL_CROP_FRACTION`] of each dimension.
    pub fn initial(image: ImageSize) -> Self {
        let width = (image.w() * INITIAL_CROP_FRACTION).clamp(image.min_w(), image.w());
        let height = (image.h() * INITIAL_CROP_FRACTION).clamp(image.min_h(), image.h());
        Self {
            x: (image.w() - width) / 2.0,
            y: (image.h() - height) / 2.0,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Position of a corner in image space.
    pub fn corner(&self, corner: Corner) -> Point {
        match corner {
            Corner::Nw => Point::new(self.x, self.y),
            Corner::Ne => Point::new(self.right(), self.y),
            Corner::Sw => Point::new(self.x, self.bottom()),
            Corner::Se => Point::new(self.right(), self.bottom()),
        }
    }

    /// Whether the rectangle satisfies every invariant for `image`.
    pub fn is_valid_for(&self, image: ImageSize) -> bool {
        const EPS: f32 = 1e-3;
        self.width + EPS >= image.min_w()
            && self.height + EPS >= image.min_h()
            && self.x >= -EPS
            && self.y >= -EPS
            && self.right() <= image.w() + EPS
            && self.bottom() <= image.h() + EPS
    }

    /// Translates `start` by `delta`, keeping the size and staying inside
    /// the image.
    pub fn moved(start: CropRect, delta: Point, image: ImageSize) -> Self {
        let max_x = (image.w() - start.width).max(0.0);
        let max_y = (image.h() - start.height).max(0.0);
        Self {
            x: (start.x + delta.x).clamp(0.0, max_x),
            y: (start.y + delta.y).clamp(0.0, max_y),
            width: start.width,
            height: start.height,
        }
    }

    /// Drags `corner` of `start` by `delta`; the opposite corner stays put.
    ///
    /// Moving edges are clamped so the size never drops below the minimum
    /// and the rectangle never leaves the image.
    pub fn resized(start: CropRect, corner: Corner, delta: Point, image: ImageSize) -> Self {
        let (min_w, min_h) = (image.min_w(), image.min_h());
        let mut next = start;

        match corner {
            Corner::Nw | Corner::Sw => {
                // left edge moves, right edge anchored
                let right = start.right();
                next.x = (start.x + delta.x).clamp(0.0, (right - min_w).max(0.0));
                next.width = right - next.x;
            }
            Corner::Ne | Corner::Se => {
                next.width = (start.width + delta.x).clamp(min_w, (image.w() - start.x).max(min_w));
            }
        }

        match corner {
            Corner::Nw | Corner::Ne => {
                // top edge moves, bottom edge anchored
                let bottom = start.bottom();
                next.y = (start.y + delta.y).clamp(0.0, (bottom - min_h).max(0.0));
                next.height = bottom - next.y;
            }
            Corner::Sw | Corner::Se => {
                next.height = (start.height + delta.y).clamp(min_h, (image.h() - start.y).max(min_h));
            }
        }

        next
    }

    /// Rounds to whole pixels, clamped to the image.
    pub fn to_pixels(&self, image: ImageSize) -> PixelRect {
        let x = (self.x.round().max(0.0) as u32).min(image.width.saturating_sub(1));
        let y = (self.y.round().max(0.0) as u32).min(image.height.saturating_sub(1));
        let width = (self.width.round().max(1.0) as u32).min(image.width - x);
        let height = (self.height.round().max(1.0) as u32).min(image.height - y);
        PixelRect { x, y, width, height }
    }
}

/// Affine map from image space to the letterboxed canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasMetrics {
    pub offset_x: f32,
    pub offset_y: f32,
    /// Canvas pixels per image pixel.
    pub ratio: f32,
}

impl CanvasMetrics {
    /// Fits `image` inside a canvas of the given size, centred.
    pub fn fit(image: ImageSize, canvas_width: f32, canvas_height: f32) -> Self {
        if image.width == 0 || image.height == 0 || canvas_width <= 0.0 || canvas_height <= 0.0 {
            return Self::identity();
        }
        let ratio = (canvas_width / image.w()).min(canvas_height / image.h());
        Self {
            offset_x: (canvas_width - image.w() * ratio) / 2.0,
            offset_y: (canvas_height - image.h() * ratio) / 2.0,
            ratio,
        }
    }

    pub const fn identity() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            ratio: 1.0,
        }
    }

    pub fn to_canvas(&self, p: Point) -> Point {
        Point::new(self.offset_x + p.x * self.ratio, self.offset_y + p.y * self.ratio)
    }

    pub fn to_image(&self, p: Point) -> Point {
        Point::new((p.x - self.offset_x) / self.ratio, (p.y - self.offset_y) / self.ratio)
    }

    /// Converts a canvas-space delta into an image-space delta.
    pub fn delta_to_image(&self, d: Point) -> Point {
        Point::new(d.x / self.ratio, d.y / self.ratio)
    }

    /// The crop rectangle as canvas-space `(min, max)` corners.
    pub fn rect_to_canvas(&self, rect: &CropRect) -> (Point, Point) {
        (
            self.to_canvas(Point::new(rect.x, rect.y)),
            self.to_canvas(Point::new(rect.right(), rect.bottom())),
        )
    }

    /// Canvas-space bounds of the whole image.
    pub fn image_bounds(&self, image: ImageSize) -> (Point, Point) {
        self.rect_to_canvas(&CropRect::new(0.0, 0.0, image.w(), image.h()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE: ImageSize = ImageSize::new(500, 500);

    #[test]
    fn initial_crop_is_centred_at_seventy_percent() {
        let rect = CropRect::initial(ImageSize::new(1000, 600));
        assert_eq!(rect, CropRect::new(150.0, 90.0, 700.0, 420.0));
    }

    #[test]
    fn initial_crop_respects_minimum_size() {
        let rect = CropRect::initial(ImageSize::new(50, 30));
        assert_eq!(rect.width, 40.0);
        assert_eq!(rect.height, 30.0);
        assert!(rect.is_valid_for(ImageSize::new(50, 30)));
    }

    #[test]
    fn se_resize_grows_unclamped() {
        let start = CropRect::new(10.0, 10.0, 100.0, 100.0);
        let next = CropRect::resized(start, Corner::Se, Point::new(50.0, 30.0), IMAGE);
        assert_eq!(next, CropRect::new(10.0, 10.0, 150.0, 130.0));
    }

    #[test]
    fn nw_resize_clamps_to_minimum() {
        let start = CropRect::new(10.0, 10.0, 100.0, 100.0);
        let next = CropRect::resized(start, Corner::Nw, Point::new(200.0, 200.0), IMAGE);
        assert_eq!(next, CropRect::new(70.0, 70.0, 40.0, 40.0));
        assert_eq!(next.corner(Corner::Se), start.corner(Corner::Se));
    }

    #[test]
    fn ne_resize_anchors_left_and_bottom() {
        let start = CropRect::new(100.0, 100.0, 100.0, 100.0);
        let next = CropRect::resized(start, Corner::Ne, Point::new(30.0, -20.0), IMAGE);
        assert_eq!(next, CropRect::new(100.0, 80.0, 130.0, 120.0));
    }

    #[test]
    fn sw_resize_anchors_right_and_top() {
        let start = CropRect::new(100.0, 100.0, 100.0, 100.0);
        let next = CropRect::resized(start, Corner::Sw, Point::new(-150.0, 500.0), IMAGE);
        assert_eq!(next, CropRect::new(0.0, 100.0, 200.0, 400.0));
    }

    #[test]
    fn move_is_clamped_inside_image() {
        let start = CropRect::new(10.0, 10.0, 100.0, 100.0);
        let next = CropRect::moved(start, Point::new(-50.0, 1000.0), IMAGE);
        assert_eq!(next, CropRect::new(0.0, 400.0, 100.0, 100.0));
    }

    #[test]
    fn metrics_letterbox_wide_image() {
        let metrics = CanvasMetrics::fit(ImageSize::new(2000, 1000), 400.0, 400.0);
        assert_eq!(metrics.ratio, 0.2);
        assert_eq!(metrics.offset_x, 0.0);
        assert_eq!(metrics.offset_y, 100.0);

        let p = Point::new(500.0, 250.0);
        let back = metrics.to_image(metrics.to_canvas(p));
        assert!((back.x - p.x).abs() < 1e-3 && (back.y - p.y).abs() < 1e-3);
        let d = metrics.delta_to_image(Point::new(10.0, -4.0));
        assert!((d.x - 50.0).abs() < 1e-3 && (d.y + 20.0).abs() < 1e-3);
    }

    #[test]
    fn pixel_rounding_stays_inside() {
        let rect = CropRect::new(399.6, 0.4, 100.4, 99.7);
        let px = rect.to_pixels(IMAGE);
        assert!(px.x + px.width <= 500);
        assert_eq!(px, PixelRect { x: 400, y: 0, width: 100, height: 100 });
    }
}

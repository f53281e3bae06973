//! UI rendering helpers for the crop window.
//!
//! Draw order per frame: the letterboxed photo, the darkened surround, the
//! crop border, then the four corner handles.

use crate::crop::{CanvasMetrics, Corner, CropRect, ImageSize, Point};
use eframe::egui;

/// Side length of a drawn corner handle, in canvas pixels.
pub const HANDLE_SIZE: f32 = 12.0;

/// Darkness of the area outside the crop (0-255).
pub const OVERLAY_ALPHA: u8 = 150;

/// Converts a canvas-space point into a screen position inside `canvas`.
pub fn to_screen(canvas: egui::Rect, p: Point) -> egui::Pos2 {
    egui::pos2(canvas.min.x + p.x, canvas.min.y + p.y)
}

/// Screen rectangle occupied by the whole photo.
pub fn image_rect(canvas: egui::Rect, metrics: &CanvasMetrics, size: ImageSize) -> egui::Rect {
    let (min, max) = metrics.image_bounds(size);
    egui::Rect::from_min_max(to_screen(canvas, min), to_screen(canvas, max))
}

/// Screen rectangle of the crop.
pub fn crop_rect(canvas: egui::Rect, metrics: &CanvasMetrics, crop: &CropRect) -> egui::Rect {
    let (min, max) = metrics.rect_to_canvas(crop);
    egui::Rect::from_min_max(to_screen(canvas, min), to_screen(canvas, max))
}

/// Square handle centred on a corner.
pub fn handle_rect(center: egui::Pos2) -> egui::Rect {
    egui::Rect::from_center_size(center, egui::vec2(HANDLE_SIZE, HANDLE_SIZE))
}

/// Draws the photo letterboxed into `target`.
pub fn draw_photo(painter: &egui::Painter, texture: &egui::TextureHandle, target: egui::Rect) {
    painter.image(
        texture.id(),
        target,
        egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
        egui::Color32::WHITE,
    );
}

/// Darkens everything in `photo_rect` outside `crop_rect`.
pub fn draw_crop_overlay(painter: &egui::Painter, photo_rect: egui::Rect, crop_rect: egui::Rect, alpha: u8) {
    let color = egui::Color32::from_black_alpha(alpha);

    // Above
    painter.rect_filled(
        egui::Rect::from_min_max(photo_rect.min, egui::pos2(photo_rect.max.x, crop_rect.min.y)),
        0.0,
        color,
    );
    // Below
    painter.rect_filled(
        egui::Rect::from_min_max(egui::pos2(photo_rect.min.x, crop_rect.max.y), photo_rect.max),
        0.0,
        color,
    );
    // Left, between above and below
    painter.rect_filled(
        egui::Rect::from_min_max(
            egui::pos2(photo_rect.min.x, crop_rect.min.y),
            egui::pos2(crop_rect.min.x, crop_rect.max.y),
        ),
        0.0,
        color,
    );
    // Right, between above and below
    painter.rect_filled(
        egui::Rect::from_min_max(
            egui::pos2(crop_rect.max.x, crop_rect.min.y),
            egui::pos2(photo_rect.max.x, crop_rect.max.y),
        ),
        0.0,
        color,
    );
}

pub fn draw_crop_border(painter: &egui::Painter, crop_rect: egui::Rect, stroke_width: f32, color: egui::Color32) {
    painter.rect_stroke(
        crop_rect,
        0.0,
        egui::Stroke::new(stroke_width, color),
        egui::StrokeKind::Middle,
    );
}

/// Draws filled square handles; `active` is highlighted.
pub fn draw_handles(
    painter: &egui::Painter,
    canvas: egui::Rect,
    handles: &[(Corner, Point); 4],
    active: Option<Corner>,
) {
    for (corner, position) in handles {
        let fill = if Some(*corner) == active {
            egui::Color32::from_rgb(37, 99, 235)
        } else {
            egui::Color32::WHITE
        };
        let rect = handle_rect(to_screen(canvas, *position));
        painter.rect_filled(rect, 2.0, fill);
        painter.rect_stroke(
            rect,
            2.0,
            egui::Stroke::new(1.0, egui::Color32::from_gray(40)),
            egui::StrokeKind::Inside,
        );
    }
}

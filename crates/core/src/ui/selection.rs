//! Pointer handling for the crop window.
//!
//! Translates egui drag responses into [`CropSession`] pointer events.
//! Positions are converted into canvas space (relative to the canvas
//! origin) before they reach the session.

use crate::crop::{Corner, CropSession, Interaction, Point};
use eframe::egui;

/// Result of processing one frame of pointer input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    /// A drag started on a handle or inside the crop.
    Grabbed(Interaction),
    /// The active drag moved the rectangle.
    Dragging,
    /// The active drag ended.
    Released,
    /// A drag started outside the crop and handles; ignored.
    Missed,
    /// Nothing happened.
    None,
}

/// Canvas-space position of a screen position.
pub fn canvas_point(canvas: egui::Rect, pos: egui::Pos2) -> Point {
    Point::new(pos.x - canvas.min.x, pos.y - canvas.min.y)
}

/// Feeds the frame's drag state from `response` into `session`.
pub fn process_pointer(response: &egui::Response, canvas: egui::Rect, session: &mut CropSession) -> PointerEvent {
    if response.drag_started() {
        let Some(pos) = response.interact_pointer_pos() else {
            return PointerEvent::None;
        };
        return match session.pointer_down(canvas_point(canvas, pos)) {
            Some(interaction) => PointerEvent::Grabbed(interaction),
            None => PointerEvent::Missed,
        };
    }

    if response.dragged() && session.is_dragging() {
        if let Some(pos) = response.interact_pointer_pos() {
            session.pointer_move(canvas_point(canvas, pos));
        }
        return PointerEvent::Dragging;
    }

    if response.drag_stopped() && session.is_dragging() {
        session.pointer_up();
        return PointerEvent::Released;
    }

    PointerEvent::None
}

/// Cursor shown for what the pointer would grab.
pub fn cursor_for(interaction: Option<Interaction>, dragging: bool) -> egui::CursorIcon {
    match interaction {
        Some(Interaction::Resize(Corner::Nw | Corner::Se)) => egui::CursorIcon::ResizeNwSe,
        Some(Interaction::Resize(Corner::Ne | Corner::Sw)) => egui::CursorIcon::ResizeNeSw,
        Some(Interaction::Move) if dragging => egui::CursorIcon::Grabbing,
        Some(Interaction::Move) => egui::CursorIcon::Grab,
        None => egui::CursorIcon::Default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_points_are_relative_to_origin() {
        let canvas = egui::Rect::from_min_size(egui::pos2(20.0, 50.0), egui::vec2(400.0, 300.0));
        assert_eq!(canvas_point(canvas, egui::pos2(120.0, 60.0)), Point::new(100.0, 10.0));
    }

    #[test]
    fn cursors_match_handles() {
        assert_eq!(cursor_for(Some(Interaction::Resize(Corner::Se)), false), egui::CursorIcon::ResizeNwSe);
        assert_eq!(cursor_for(Some(Interaction::Resize(Corner::Ne)), true), egui::CursorIcon::ResizeNeSw);
        assert_eq!(cursor_for(Some(Interaction::Move), true), egui::CursorIcon::Grabbing);
        assert_eq!(cursor_for(None, false), egui::CursorIcon::Default);
    }
}

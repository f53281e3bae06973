//! Crop window application.
//!
//! This module contains the `CropTool` struct which implements the
//! `eframe::App` trait for the interactive crop/rotate window.

use super::rendering::{
    OVERLAY_ALPHA, crop_rect, draw_crop_border, draw_crop_overlay, draw_handles, draw_photo, image_rect,
};
use super::selection::{PointerEvent, canvas_point, cursor_for, process_pointer};
use super::state::{CropResult, CropToolState, ExportEvent};
use crate::crop::{CropSession, CropState, Interaction};
use crate::error::{AppError, Result};
use crate::image_processing::{EncodedImage, ImageProcessor};
use eframe::egui;
use image::DynamicImage;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, warn};

/// The crop window application.
///
/// Shows one photo letterboxed in the window with the crop rectangle on
/// top. Enter applies, Escape cancels, R rotates.
pub struct CropTool {
    // Image state
    image_texture: Option<egui::TextureHandle>,
    /// Pre-converted image data for fast texture upload
    color_image: Option<egui::ColorImage>,
    session: CropSession,
    rotations: u8,

    pub result: Arc<Mutex<CropResult>>,

    state: CropToolState,
    rx: Receiver<ExportEvent>,
    tx: Sender<ExportEvent>,
}

fn color_image(image: &DynamicImage) -> egui::ColorImage {
    let buffer = image.to_rgba8();
    let size = [image.width() as usize, image.height() as usize];
    egui::ColorImage::from_rgba_unmultiplied(size, buffer.as_flat_samples().as_slice())
}

impl CropTool {
    /// Creates a crop window for `session`.
    ///
    /// # Arguments
    /// * `session` - The crop session over the decoded photo
    /// * `result` - Shared result container for returning the crop to the caller
    pub fn new(session: CropSession, result: Arc<Mutex<CropResult>>) -> Self {
        let (tx, rx) = channel();
        // Converting up front keeps the first frame fast.
        let color_image = color_image(session.image());

        Self {
            image_texture: None,
            color_image: Some(color_image),
            session,
            rotations: 0,
            result,
            state: CropToolState::Editing,
            rx,
            tx,
        }
    }

    fn rotate(&mut self) {
        self.session.rotate90();
        self.rotations = (self.rotations + 1) % 4;
        self.color_image = Some(color_image(self.session.image()));
        self.image_texture = None;
    }

    /// Extracts the crop on a worker thread and reports back through the
    /// channel.
    fn submit_export(&mut self) {
        self.state = CropToolState::Exporting;

        let tx = self.tx.clone();
        let image = self.session.image().clone();
        let rect = self.session.crop().to_pixels(self.session.image_size());
        debug!(?rect, "exporting crop");

        thread::spawn(move || {
            let event = match ImageProcessor::export_crop(&image, rect) {
                Ok(encoded) => ExportEvent::Done(encoded),
                Err(e) => ExportEvent::Failed(e.to_string()),
            };
            let _ = tx.send(event);
        });
    }

    /// Processes events from the export worker.
    fn process_export_events(&mut self, ctx: &egui::Context) {
        while let Ok(event) = self.rx.try_recv() {
            match event {
                ExportEvent::Done(encoded) => {
                    match self.result.lock() {
                        Ok(mut result) => {
                            result.image = Some(encoded);
                            result.rotations = self.rotations;
                        }
                        Err(_) => warn!("crop result lock poisoned"),
                    }
                    ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                }
                ExportEvent::Failed(message) => {
                    self.state = CropToolState::Error(message);
                }
            }
        }
    }

    /// Renders the toolbar below the photo.
    fn render_toolbar(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        let pixels = self.session.crop().to_pixels(self.session.image_size());
        let editing = self.state == CropToolState::Editing;

        ui.horizontal(|ui| {
            if ui.add_enabled(editing, egui::Button::new("⟳ Rotate")).clicked() {
                self.rotate();
            }
            ui.label(format!("{} × {} px", pixels.width, pixels.height));

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.add_enabled(editing, egui::Button::new("Apply")).clicked() {
                    self.submit_export();
                }
                if ui.button("Cancel").clicked() {
                    ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                }
                if self.state == CropToolState::Exporting {
                    ui.spinner();
                }
            });
        });

        let mut dismiss = false;
        if let CropToolState::Error(message) = &self.state {
            ui.horizontal(|ui| {
                ui.label(egui::RichText::new(format!("Error: {}", message)).color(egui::Color32::RED));
                dismiss = ui.button("Dismiss").clicked();
            });
        }
        if dismiss {
            self.state = CropToolState::Editing;
        }
    }

    /// Renders the photo, the overlay and handles, and handles dragging.
    fn render_canvas(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        let canvas = ui.max_rect();
        let metrics = self.session.layout(canvas.width(), canvas.height());

        if self.state == CropToolState::Editing {
            let response = ui.interact(canvas, ui.id().with("crop_canvas"), egui::Sense::drag());
            if let PointerEvent::Grabbed(interaction) = process_pointer(&response, canvas, &mut self.session) {
                debug!(?interaction, "crop drag started");
            }

            let hovered = ctx
                .pointer_hover_pos()
                .and_then(|pos| self.session.hit_test(canvas_point(canvas, pos)));
            let active = match self.session.state() {
                CropState::Dragging(drag) => Some(drag.interaction),
                CropState::Idle => hovered,
            };
            if active.is_some() {
                ctx.set_cursor_icon(cursor_for(active, self.session.is_dragging()));
            }
        }

        let painter = ui.painter();
        let photo = image_rect(canvas, &metrics, self.session.image_size());
        if let Some(texture) = &self.image_texture {
            draw_photo(painter, texture, photo);
        }

        let crop = crop_rect(canvas, &metrics, &self.session.crop());
        draw_crop_overlay(painter, photo, crop, OVERLAY_ALPHA);
        draw_crop_border(painter, crop, 2.0, egui::Color32::WHITE);

        let active_corner = match self.session.state() {
            CropState::Dragging(drag) => match drag.interaction {
                Interaction::Resize(corner) => Some(corner),
                Interaction::Move => None,
            },
            CropState::Idle => None,
        };
        draw_handles(painter, canvas, &self.session.handle_positions(), active_corner);
    }
}

impl eframe::App for CropTool {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // Enforce dark mode
        ctx.set_visuals(egui::Visuals::dark());

        self.process_export_events(ctx);

        // Upload texture on first frame and after rotation
        if self.image_texture.is_none() {
            if let Some(color_image) = self.color_image.take() {
                self.image_texture = Some(ctx.load_texture("photo", color_image, egui::TextureOptions::LINEAR));
            }
        }

        if self.state == CropToolState::Editing {
            let (enter, escape, rotate) = ctx.input(|i| {
                (
                    i.key_pressed(egui::Key::Enter),
                    i.key_pressed(egui::Key::Escape),
                    i.key_pressed(egui::Key::R),
                )
            });
            if escape {
                ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            } else if enter {
                self.submit_export();
            } else if rotate {
                self.rotate();
            }
        }

        egui::TopBottomPanel::bottom("crop_toolbar").show(ctx, |ui| {
            ui.add_space(6.0);
            self.render_toolbar(ui, ctx);
            ui.add_space(6.0);
        });

        // Canvas with no margins
        let panel_frame = egui::Frame::default()
            .fill(egui::Color32::from_gray(18))
            .inner_margin(egui::Margin::same(0))
            .outer_margin(egui::Margin::same(0));

        egui::CentralPanel::default()
            .frame(panel_frame)
            .show(ctx, |ui| self.render_canvas(ui, ctx));

        if self.state == CropToolState::Exporting {
            ctx.request_repaint();
        }
    }
}

/// Opens the crop window for `photo` and blocks until it closes.
///
/// # Returns
/// The committed crop, or `None` if the user cancelled.
pub fn run(photo: &EncodedImage) -> Result<Option<EncodedImage>> {
    let session = CropSession::from_encoded(photo)?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1024.0, 800.0])
            .with_min_inner_size([480.0, 360.0]),
        ..Default::default()
    };

    let result = Arc::new(Mutex::new(CropResult::default()));
    let app_result = result.clone();

    eframe::run_native(
        "Snaplist Crop",
        options,
        Box::new(move |_cc| Ok(Box::new(CropTool::new(session, app_result)) as Box<dyn eframe::App>)),
    )
    .map_err(|e| AppError::ui(format!("Failed to run UI: {}", e)))?;

    // Extract result from shared state
    let lock = result
        .lock()
        .map_err(|_| AppError::ui("Failed to acquire result lock"))?;
    if let Some(image) = &lock.image {
        debug!(width = image.width, height = image.height, rotations = lock.rotations, "crop committed");
    }
    Ok(lock.image.clone())
}

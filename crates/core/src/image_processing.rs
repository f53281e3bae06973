//! Image processing and encoding utilities.
//!
//! This module handles the capture-side image pipeline: downscaling raw
//! photos before they are held in memory or uploaded, rotating them by a
//! quarter turn, exporting a committed crop, and converting to and from
//! the `data:` URLs the providers accept.
//!
//! # Quality levels
//!
//! | step       | bound                | JPEG quality |
//! |------------|----------------------|--------------|
//! | normalize  | fit in 1024x1024     | 80           |
//! | rotate90   | none                 | 90           |
//! | crop export| longest side = 1024  | 85           |

use crate::crop::PixelRect;
use crate::error::{AppError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_WIDTH: u32 = 1024;
pub const DEFAULT_MAX_HEIGHT: u32 = 1024;
pub const NORMALIZE_QUALITY: u8 = 80;
pub const ROTATE_QUALITY: u8 = 90;
pub const CROP_QUALITY: u8 = 85;
/// Longest side of a committed crop.
pub const CROP_OUTPUT_SIDE: u32 = 1024;

const JPEG_MIME: &str = "image/jpeg";

/// An encoded image together with its pixel dimensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    /// Renders the image as a `data:<mime>;base64,<payload>` URL.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.bytes))
    }

    /// Parses a data URL and reads the dimensions from the decoded image.
    pub fn from_data_url(url: &str) -> Result<Self> {
        let (mime, payload) = parse_data_url(url)?;
        let bytes = BASE64
            .decode(payload.trim())
            .map_err(|e| AppError::format(format!("Invalid base64 image payload: {}", e)))?;
        let image = ImageProcessor::decode(&bytes)?;
        Ok(Self {
            width: image.width(),
            height: image.height(),
            bytes,
            mime,
        })
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        ImageProcessor::decode(&self.bytes)
    }
}

/// Splits a data URL into its MIME type and base64 payload.
///
/// The MIME type defaults to `image/jpeg` when the header does not name one.
///
/// # Errors
///
/// Returns a `format` analysis error when the URL has no `,` separator or an
/// empty payload.
pub fn parse_data_url(url: &str) -> Result<(String, &str)> {
    let (header, data) = url
        .split_once(',')
        .ok_or_else(|| AppError::format("Invalid image: expected a data URL"))?;
    if data.trim().is_empty() {
        return Err(AppError::format("Invalid image: empty data URL payload"));
    }

    let mime = header
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .filter(|m| !m.is_empty())
        .unwrap_or(JPEG_MIME)
        .to_string();

    Ok((mime, data))
}

/// Computes the size of `(width, height)` scaled down to fit inside
/// `(max_width, max_height)`, preserving aspect ratio. Never upscales.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 || (width <= max_width && height <= max_height) {
        return (width, height);
    }
    let scale = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
    let new_w = ((width as f64 * scale).round() as u32).clamp(1, max_width.max(1));
    let new_h = ((height as f64 * scale).round() as u32).clamp(1, max_height.max(1));
    (new_w, new_h)
}

/// Computes the size with the longest side equal to `side`, preserving
/// aspect ratio within rounding.
pub fn fit_longest_side(width: u32, height: u32, side: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    if width >= height {
        let h = ((height as f64 * side as f64 / width as f64).round() as u32).max(1);
        (side, h)
    } else {
        let w = ((width as f64 * side as f64 / height as f64).round() as u32).max(1);
        (w, side)
    }
}

/// Image processing utilities for the capture workflow.
///
/// This struct provides static methods; the source bytes are never
/// modified, every operation returns a new [`EncodedImage`].
pub struct ImageProcessor;

impl ImageProcessor {
    /// Decodes raw bytes in any enabled format.
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(AppError::image("Image data is empty"));
        }
        image::load_from_memory(bytes).map_err(|e| AppError::image(format!("Failed to decode image: {}", e)))
    }

    /// Downscales a raw image to fit the bounds and re-encodes it as JPEG at
    /// [`NORMALIZE_QUALITY`].
    pub fn normalize(bytes: &[u8], max_width: u32, max_height: u32) -> Result<EncodedImage> {
        let image = Self::decode(bytes)?;
        Self::normalize_image(&image, max_width, max_height)
    }

    pub fn normalize_image(image: &DynamicImage, max_width: u32, max_height: u32) -> Result<EncodedImage> {
        let (w, h) = fit_within(image.width(), image.height(), max_width, max_height);
        if (w, h) == (image.width(), image.height()) {
            return Self::encode_jpeg(image, NORMALIZE_QUALITY);
        }
        let resized = image.resize_exact(w, h, FilterType::Lanczos3);
        Self::encode_jpeg(&resized, NORMALIZE_QUALITY)
    }

    /// Rotates a raw image a quarter turn clockwise and re-encodes it at
    /// [`ROTATE_QUALITY`].
    pub fn rotate90(bytes: &[u8]) -> Result<EncodedImage> {
        let image = Self::decode(bytes)?;
        Self::encode_jpeg(&image.rotate90(), ROTATE_QUALITY)
    }

    /// Extracts `rect` at pixel precision and rescales it so the longest
    /// side is exactly [`CROP_OUTPUT_SIDE`], encoded at [`CROP_QUALITY`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidCrop`] if the rectangle is empty or does
    /// not fit inside the image.
    pub fn export_crop(image: &DynamicImage, rect: PixelRect) -> Result<EncodedImage> {
        if rect.width == 0 || rect.height == 0 {
            return Err(AppError::InvalidCrop("crop region has zero area".to_string()));
        }
        if rect.x + rect.width > image.width() || rect.y + rect.height > image.height() {
            return Err(AppError::InvalidCrop(format!(
                "{}x{}+{}+{} exceeds {}x{} image",
                rect.width,
                rect.height,
                rect.x,
                rect.y,
                image.width(),
                image.height()
            )));
        }

        let cropped = image.crop_imm(rect.x, rect.y, rect.width, rect.height);
        let (w, h) = fit_longest_side(rect.width, rect.height, CROP_OUTPUT_SIDE);
        let scaled = cropped.resize_exact(w, h, FilterType::Lanczos3);
        Self::encode_jpeg(&scaled, CROP_QUALITY)
    }

    /// Encodes a DynamicImage as JPEG at the given quality (1-100).
    pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<EncodedImage> {
        let rgb = image.to_rgb8();
        let mut buffer: Vec<u8> = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality)
            .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
            .map_err(|e| AppError::image(format!("Failed to encode image: {}", e)))?;

        Ok(EncodedImage {
            bytes: buffer,
            mime: JPEG_MIME.to_string(),
            width: rgb.width(),
            height: rgb.height(),
        })
    }

    /// Runs [`ImageProcessor::normalize`] on the blocking pool, bounded by
    /// `timeout` and abandoned when `cancel` fires.
    pub async fn normalize_bounded(
        bytes: Vec<u8>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<EncodedImage> {
        run_blocking("decoding an image", timeout, cancel, move || {
            Self::normalize(&bytes, DEFAULT_MAX_WIDTH, DEFAULT_MAX_HEIGHT)
        })
        .await
    }

    /// Runs [`ImageProcessor::rotate90`] on the blocking pool.
    pub async fn rotate90_bounded(
        bytes: Vec<u8>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<EncodedImage> {
        run_blocking("rotating an image", timeout, cancel, move || Self::rotate90(&bytes)).await
    }
}

/// Runs CPU-bound image work off the async executor with a time bound and
/// a cancellation token.
pub(crate) async fn run_blocking<T, F>(
    label: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    work: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        joined = tokio::time::timeout(timeout, task) => match joined {
            Err(_) => Err(AppError::Timeout(label.to_string())),
            Ok(Err(e)) => Err(AppError::image(format!("Worker failed while {}: {}", label, e))),
            Ok(Ok(result)) => result,
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn small_images_keep_their_dimensions() {
        let out = ImageProcessor::normalize(&sample_png(300, 200), 1024, 1024).unwrap();
        assert_eq!((out.width, out.height), (300, 200));
        assert_eq!(out.mime, "image/jpeg");
    }

    #[test]
    fn large_images_scale_to_the_bound() {
        let out = ImageProcessor::normalize(&sample_png(2048, 1024), 1024, 1024).unwrap();
        assert_eq!((out.width, out.height), (1024, 512));

        let tall = ImageProcessor::normalize(&sample_png(600, 1800), 1024, 1024).unwrap();
        assert_eq!((tall.width, tall.height), (341, 1024));
    }

    #[test]
    fn fit_within_respects_both_bounds() {
        assert_eq!(fit_within(2000, 1000, 1024, 400), (800, 400));
        assert_eq!(fit_within(10, 10, 1024, 1024), (10, 10));
    }

    #[test]
    fn four_rotations_restore_dimensions() {
        let mut bytes = sample_png(320, 200);
        let mut dims = Vec::new();
        for _ in 0..4 {
            let rotated = ImageProcessor::rotate90(&bytes).unwrap();
            dims.push((rotated.width, rotated.height));
            bytes = rotated.bytes;
        }
        assert_eq!(dims, vec![(200, 320), (320, 200), (200, 320), (320, 200)]);
    }

    #[test]
    fn crop_export_has_longest_side_1024() {
        let image = ImageProcessor::decode(&sample_png(3000, 2000)).unwrap();
        let rect = PixelRect { x: 100, y: 100, width: 2000, height: 1500 };
        let out = ImageProcessor::export_crop(&image, rect).unwrap();
        assert_eq!(out.width, 1024);
        assert_eq!(out.height, 768);
    }

    #[test]
    fn crop_export_rejects_out_of_bounds() {
        let image = ImageProcessor::decode(&sample_png(100, 100)).unwrap();
        let rect = PixelRect { x: 50, y: 50, width: 60, height: 10 };
        assert!(matches!(
            ImageProcessor::export_crop(&image, rect),
            Err(AppError::InvalidCrop(_))
        ));
    }

    #[test]
    fn data_url_round_trip_keeps_dimensions() {
        let encoded = ImageProcessor::normalize(&sample_png(64, 48), 1024, 1024).unwrap();
        let url = encoded.to_data_url();
        assert!(url.starts_with("data:image/jpeg;base64,"));
        let parsed = EncodedImage::from_data_url(&url).unwrap();
        assert_eq!((parsed.width, parsed.height), (64, 48));
    }

    #[test]
    fn data_url_without_separator_is_a_format_error() {
        let err = parse_data_url("data:image/png;base64").unwrap_err();
        assert_eq!(err.analysis_kind(), Some(crate::error::AnalysisErrorKind::Format));
        assert_eq!(parse_data_url("abc,xyz").unwrap().0, "image/jpeg");
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            ImageProcessor::normalize(b"definitely not an image", 1024, 1024),
            Err(AppError::ImageProcessing(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_work_reports_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = ImageProcessor::normalize_bounded(sample_png(32, 32), Duration::from_secs(5), &cancel).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }
}

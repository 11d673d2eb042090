//! # Bitmap Source
//!
//! Turns image files and QR payloads into printer-width
//! [`MonochromeRaster`]s.
//!
//! ## Image Pipeline
//!
//! ```text
//! decode → composite alpha on white → shrink to printer width
//!        → invert luma to intensity → center-pad → dither
//! ```
//!
//! Images narrower than the head are never upscaled; they are centered with
//! white margins instead.

use std::path::Path;

use image::{DynamicImage, imageops::FilterType};
use qrcode::{Color, QrCode};

use super::dither::{self, DitheringAlgorithm};
use super::raster::MonochromeRaster;
use crate::error::PeripageError;
use crate::printer::PrinterModel;

/// Default QR code edge length in pixels before fitting to the head.
pub const DEFAULT_QR_SIZE: u32 = 500;

/// Quiet zone around a QR code, in modules.
const QR_QUIET_ZONE: usize = 4;

/// Produces rasters sized for one printer model.
#[derive(Debug, Clone, Copy)]
pub struct BitmapSource {
    model: PrinterModel,
    dithering: DitheringAlgorithm,
}

impl BitmapSource {
    pub fn new(model: PrinterModel, dithering: DitheringAlgorithm) -> Self {
        Self { model, dithering }
    }

    /// Decode an image file and convert it for printing.
    pub fn load_bitmap<P: AsRef<Path>>(&self, path: P) -> Result<MonochromeRaster, PeripageError> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|e| {
            PeripageError::Image(format!("Failed to decode {}: {}", path.display(), e))
        })?;
        Ok(self.convert(&image))
    }

    /// Decode an in-memory image (PNG, JPEG, ...) and convert it for printing.
    pub fn load_bitmap_bytes(&self, bytes: &[u8]) -> Result<MonochromeRaster, PeripageError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| PeripageError::Image(format!("Failed to decode image: {}", e)))?;
        Ok(self.convert(&image))
    }

    /// Render `payload` as a QR code roughly `size` pixels square.
    ///
    /// Modules are scaled by a whole number of dots so edges stay crisp; the
    /// code shrinks to fit the printer width when `size` is larger.
    pub fn render_qr(&self, payload: &str, size: u32) -> Result<MonochromeRaster, PeripageError> {
        let code = QrCode::new(payload.as_bytes())
            .map_err(|e| PeripageError::Image(format!("Failed to build QR code: {}", e)))?;

        let modules = code.width();
        let span = modules + 2 * QR_QUIET_ZONE;
        let target = size.min(self.model.width_dots as u32) as usize;
        let scale = (target / span).max(1);
        let side = span * scale;

        let page_width = (self.model.width_dots as usize).max(side.div_ceil(8) * 8);
        let offset = (page_width - side) / 2;

        Ok(MonochromeRaster::from_fn(
            page_width as u32,
            side as u32,
            |x, y| {
                let x = x as usize;
                if x < offset || x >= offset + side {
                    return false;
                }
                let mx = (x - offset) / scale;
                let my = y as usize / scale;
                if mx < QR_QUIET_ZONE
                    || my < QR_QUIET_ZONE
                    || mx >= QR_QUIET_ZONE + modules
                    || my >= QR_QUIET_ZONE + modules
                {
                    return false;
                }
                code[(mx - QR_QUIET_ZONE, my - QR_QUIET_ZONE)] == Color::Dark
            },
        ))
    }

    /// Resize, invert, pad and dither a decoded image.
    fn convert(&self, image: &DynamicImage) -> MonochromeRaster {
        let page_width = self.model.width_dots as usize;
        let intensity = image_to_intensity(image, page_width);
        let height = intensity.len() / page_width;
        dither::dither(&intensity, page_width, height, self.dithering)
    }
}

/// Convert an image into a `page_width`-wide intensity buffer
/// (0.0 = white, 1.0 = black), centered horizontally.
fn image_to_intensity(image: &DynamicImage, page_width: usize) -> Vec<f32> {
    let (src_w, src_h) = (image.width().max(1), image.height().max(1));
    let width = (src_w as usize).min(page_width);
    let height = ((width as f64 / src_w as f64) * src_h as f64).round().max(1.0) as usize;

    let resized = if width as u32 == src_w && height as u32 == src_h {
        image.clone()
    } else {
        image.resize_exact(width as u32, height as u32, FilterType::Lanczos3)
    };
    let gray = resized.to_luma_alpha8();

    let offset = (page_width - width) / 2;
    let mut buffer = vec![0.0f32; page_width * height];
    for y in 0..height {
        for x in 0..width {
            let pixel = gray.get_pixel(x as u32, y as u32);
            let alpha = pixel[1] as f32 / 255.0;
            // Transparent areas print as paper
            let luma = pixel[0] as f32 / 255.0 * alpha + (1.0 - alpha);
            buffer[y * page_width + offset + x] = 1.0 - luma;
        }
    }
    buffer
}

//! # Dithering
//!
//! Converts a grayscale intensity buffer into a [`MonochromeRaster`].
//!
//! Intensities run from 0.0 (white, no dot) to 1.0 (black, full dot), which
//! is already the printer's polarity: the image source inverts luma when it
//! builds the buffer.
//!
//! ## Algorithms
//!
//! | Method | Speed | Quality | Artifacts |
//! |--------|-------|---------|-----------|
//! | Floyd-Steinberg | Slower | Best for photos | Worms in flat areas |
//! | Bayer 8x8 | Fast | Good | Regular cross-hatch |
//! | Threshold | Fastest | Line art only | Banding |
//!
//! Floyd-Steinberg is the default: labels are mostly photos and QR codes,
//! and QR modules are pure black/white so every method renders them the same.

use serde::{Deserialize, Serialize};

use super::raster::MonochromeRaster;

/// Bayer 8x8 dithering matrix
///
/// Values range from 0-63. Low values activate first at low intensities.
pub const BAYER8: [[u8; 8]; 8] = [
    [0, 32, 8, 40, 2, 34, 10, 42],
    [48, 16, 56, 24, 50, 18, 58, 26],
    [12, 44, 4, 36, 14, 46, 6, 38],
    [60, 28, 52, 20, 62, 30, 54, 22],
    [3, 35, 11, 43, 1, 33, 9, 41],
    [51, 19, 59, 27, 49, 17, 57, 25],
    [15, 47, 7, 39, 13, 45, 5, 37],
    [63, 31, 55, 23, 61, 29, 53, 21],
];

/// Selectable dithering algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DitheringAlgorithm {
    #[default]
    FloydSteinberg,
    Bayer,
    Threshold,
}

/// Get the Bayer threshold for a pixel position, in (0, 1).
///
/// Adding 0.5 before dividing keeps black (1.0) always printing and white
/// (0.0) never printing.
#[inline]
pub fn threshold(x: usize, y: usize) -> f32 {
    let matrix_value = BAYER8[y & 7][x & 7];
    (matrix_value as f32 + 0.5) / 64.0
}

/// Bayer decision for one dot.
///
/// ```
/// use peripage::render::dither::should_print;
///
/// assert!(should_print(0, 0, 1.0));
/// assert!(!should_print(0, 0, 0.0));
/// ```
#[inline]
pub fn should_print(x: usize, y: usize, intensity: f32) -> bool {
    intensity > threshold(x, y)
}

/// Dither a row-major intensity buffer of `width × height` values.
///
/// ## Panics
///
/// Panics if `intensity.len() != width * height`.
pub fn dither(
    intensity: &[f32],
    width: usize,
    height: usize,
    algorithm: DitheringAlgorithm,
) -> MonochromeRaster {
    assert_eq!(intensity.len(), width * height, "intensity buffer size");

    match algorithm {
        DitheringAlgorithm::Bayer => MonochromeRaster::from_fn(width as u32, height as u32, |x, y| {
            should_print(
                x as usize,
                y as usize,
                intensity[y as usize * width + x as usize],
            )
        }),
        DitheringAlgorithm::Threshold => {
            MonochromeRaster::from_fn(width as u32, height as u32, |x, y| {
                intensity[y as usize * width + x as usize] >= 0.5
            })
        }
        DitheringAlgorithm::FloydSteinberg => floyd_steinberg(intensity, width, height),
    }
}

/// Error diffusion with the classic 7/16, 3/16, 5/16, 1/16 weights.
fn floyd_steinberg(intensity: &[f32], width: usize, height: usize) -> MonochromeRaster {
    let mut buf = intensity.to_vec();
    let mut black = vec![false; width * height];

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            let old = buf[idx];
            let on = old >= 0.5;
            black[idx] = on;
            let err = old - if on { 1.0 } else { 0.0 };

            if x + 1 < width {
                buf[idx + 1] += err * 7.0 / 16.0;
            }
            if y + 1 < height {
                if x > 0 {
                    buf[idx + width - 1] += err * 3.0 / 16.0;
                }
                buf[idx + width] += err * 5.0 / 16.0;
                if x + 1 < width {
                    buf[idx + width + 1] += err * 1.0 / 16.0;
                }
            }
        }
    }

    MonochromeRaster::from_fn(width as u32, height as u32, |x, y| {
        black[y as usize * width + x as usize]
    })
}

// ============================================================================
// TESTS
// ============================================================================

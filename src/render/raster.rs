//! # Monochrome Raster
//!
//! A packed 1-bit-per-pixel image, the hand-off format between the bitmap
//! source and the encoder.
//!
//! ## Layout
//!
//! Row-major, `ceil(width / 8)` bytes per row, MSB = leftmost pixel,
//! 1 = black. Trailing bits of a row are padding and ignored.

use crate::error::EncodingError;

/// An immutable packed monochrome image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonochromeRaster {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl MonochromeRaster {
    /// Wrap a packed buffer.
    ///
    /// Only the buffer length is checked here; whether the width is
    /// printable is the encoder's decision.
    ///
    /// ```
    /// use peripage::render::MonochromeRaster;
    ///
    /// let raster = MonochromeRaster::new(16, 2, vec![0xFF, 0x00, 0x0F, 0xF0]).unwrap();
    /// assert_eq!(raster.row(1), &[0x0F, 0xF0]);
    /// assert!(MonochromeRaster::new(16, 2, vec![0; 3]).is_err());
    /// ```
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, EncodingError> {
        let expected = Self::row_bytes_for(width) * height as usize;
        if data.len() != expected {
            return Err(EncodingError::BufferLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// An all-white raster.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; Self::row_bytes_for(width) * height as usize],
        }
    }

    /// Build a raster from a per-pixel predicate (`true` = black).
    pub fn from_fn<F>(width: u32, height: u32, mut is_black: F) -> Self
    where
        F: FnMut(u32, u32) -> bool,
    {
        let row_bytes = Self::row_bytes_for(width);
        let mut data = vec![0u8; row_bytes * height as usize];
        for y in 0..height {
            let row = &mut data[y as usize * row_bytes..][..row_bytes];
            for x in 0..width {
                if is_black(x, y) {
                    row[x as usize / 8] |= 0x80 >> (x % 8);
                }
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per packed row.
    #[inline]
    pub fn row_bytes(&self) -> usize {
        Self::row_bytes_for(self.width)
    }

    /// The whole packed buffer.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Packed bytes of row `y`.
    pub fn row(&self, y: u32) -> &[u8] {
        let row_bytes = self.row_bytes();
        &self.data[y as usize * row_bytes..][..row_bytes]
    }

    /// Whether the pixel at (x, y) is black.
    pub fn pixel(&self, x: u32, y: u32) -> bool {
        let byte = self.row(y)[x as usize / 8];
        byte & (0x80 >> (x % 8)) != 0
    }

    /// Take the packed buffer.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    fn row_bytes_for(width: u32) -> usize {
        (width as usize).div_ceil(8)
    }
}

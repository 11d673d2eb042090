//! # Rendering Module
//!
//! This module produces the monochrome bitmaps that get printed.
//!
//! ## Modules
//!
//! - [`raster`]: The packed 1-bit image type
//! - [`dither`]: Grayscale to black/white conversion
//! - [`source`]: Image files and QR payloads to printer-width rasters
//!
//! ## Usage Example
//!
//! ```
//! use peripage::printer::PrinterModel;
//! use peripage::render::{BitmapSource, DitheringAlgorithm};
//!
//! let source = BitmapSource::new(PrinterModel::A6, DitheringAlgorithm::default());
//! let raster = source.render_qr("https://example.com", 300)?;
//! assert_eq!(raster.width(), 384);
//! # Ok::<(), peripage::PeripageError>(())
//! ```

pub mod dither;
pub mod raster;
pub mod source;

pub use dither::DitheringAlgorithm;
pub use raster::MonochromeRaster;
pub use source::BitmapSource;
